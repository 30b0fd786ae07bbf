//! Tenant lifecycle control plane
//!
//! Provisions, isolates and manages per-tenant backing stores for a
//! multi-tenant application.
//!
//! # Components
//!
//! - [`NameResolver`]: deterministic schema names, database paths and
//!   object-store prefixes derived from a tenant id
//! - [`TenantRegistry`]: durable catalog of provisioned tenants, stored in
//!   the bootstrap tenant's own boundary
//! - [`BootstrapManager`]: idempotent creation of the bootstrap tenant
//! - [`ConnectionManager`]: per-tenant connection cache with per-tenant locks
//! - [`TenantProvisioner`]: the six-step create workflow with non-destructive
//!   rollback
//! - [`ControlPlane`]: facade wiring them together from [`TenancySettings`]
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tessera_tenancy::*;
//!
//! let manifest = SchemaManifest::new().table(
//!     TableDef::new("documents")
//!         .column(ColumnDef::new("id", ColumnType::Text).primary_key())
//!         .column(ColumnDef::new("title", ColumnType::Text)),
//! );
//!
//! let settings = TenancySettings::postgres("postgres://app@localhost/documents");
//! let plane = ControlPlane::connect(&settings, manifest)?;
//!
//! plane.bootstrap("installer").await?;
//! let record = plane.create_tenant("acme", "Acme Corp", "admin").await?;
//! assert_eq!(record.schema_name.as_deref(), Some("tenant_acme"));
//!
//! let conn = plane.get_connection("acme").await?;
//! ```
//!
//! # Backends
//!
//! [`SeaOrmProvider`] isolates by PostgreSQL schema or by SQLite file.
//! [`MemoryProvider`] keeps everything in process and can inject faults.

pub mod backend;
pub mod bootstrap;
pub mod connection;
pub mod control;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod provisioner;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod storage;
pub mod tenant;

pub use backend::{
    BackendProvider, BoundaryInventory, MemoryConnection, MemoryProvider, MemoryStats,
    SeaOrmProvider,
};
pub use bootstrap::{BootstrapManager, BootstrapState};
pub use connection::ConnectionManager;
pub use control::ControlPlane;
pub use error::{BackendError, BackendResult, TenantError, TenantResult};
pub use manifest::{
    ColumnDef, ColumnType, DdlKind, DdlStatement, IndexDef, REGISTRY_TABLE, SchemaManifest,
    SqlDialect, TableDef, render_ddl,
};
pub use naming::NameResolver;
pub use provisioner::{ProvisioningOutcome, ProvisioningStep, StepReport, TenantProvisioner};
pub use registry::{RegistryStore, TenantRegistry};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use schema::{IndexFailure, IndexReport, SchemaInstaller, SetupReport, TableFailure};
pub use storage::{ObjectStoreConfig, StaticStorageResolver, StorageConfigResolver};
pub use tenant::{IsolationBoundary, IsolationStrategy, TenantId, TenantRecord};

pub use tessera_config::TenancySettings;
