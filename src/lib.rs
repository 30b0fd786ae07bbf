// Tessera - a multi-tenant control plane for Rust
//
// Provisions isolated per-tenant backing stores, keeps the tenant registry
// and hands out cached per-tenant connections.

// Settings are always available
pub use tessera_config as config;
pub use tessera_config::{SettingsBuilder, TenancySettings};

#[cfg(feature = "tenancy")]
pub use tessera_tenancy as tenancy;

/// Prelude for common imports.
///
/// ```
/// use tessera::prelude::*;
/// ```
pub mod prelude {
    pub use tessera_config::{
        BackendSettings, IsolationStrategy, SettingsBuilder, TenancySettings,
    };

    #[cfg(feature = "tenancy")]
    pub use tessera_tenancy::{
        BackendProvider, ColumnDef, ColumnType, ControlPlane, IndexDef, IsolationBoundary,
        MemoryProvider, SchemaManifest, SeaOrmProvider, TableDef, TenantError, TenantId,
        TenantRecord, TenantResult,
    };
}
