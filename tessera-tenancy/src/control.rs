//! Control plane facade
//!
//! Wires the resolver, connection manager, bootstrap manager and provisioner
//! together from one [`TenancySettings`] and exposes the operations the
//! hosting application calls.
//!
//! ```rust,ignore
//! let settings = SettingsBuilder::new().add_file("tessera.toml").load_env().build()?;
//! let plane = ControlPlane::connect(&settings, app_manifest)?;
//!
//! plane.bootstrap("installer").await?;
//! plane.create_tenant("acme", "Acme Corp", "admin").await?;
//!
//! let conn = plane.get_connection("acme").await?;
//! ```

use crate::backend::{BackendProvider, MemoryProvider, SeaOrmProvider};
use crate::bootstrap::BootstrapManager;
use crate::connection::ConnectionManager;
use crate::error::{TenantError, TenantResult};
use crate::manifest::SchemaManifest;
use crate::naming::NameResolver;
use crate::provisioner::{ProvisioningOutcome, TenantProvisioner};
use crate::retry::RetryPolicy;
use crate::storage::{ObjectStoreConfig, StaticStorageResolver, StorageConfigResolver};
use crate::tenant::{IsolationBoundary, TenantRecord};
use std::sync::Arc;
use tessera_config::{BackendSettings, TenancySettings, Validate};

/// Entry point for tenant lifecycle operations.
pub struct ControlPlane<P: BackendProvider> {
    resolver: Arc<NameResolver>,
    connections: Arc<ConnectionManager<P>>,
    bootstrap: Arc<BootstrapManager<P>>,
    provisioner: TenantProvisioner<P>,
    storage: Arc<dyn StorageConfigResolver>,
}

impl<P: BackendProvider> ControlPlane<P> {
    /// Build a control plane over `provider`.
    ///
    /// `manifest` is the application schema applied to every tenant
    /// boundary, including the bootstrap tenant's.
    pub fn new(provider: Arc<P>, settings: &TenancySettings, manifest: SchemaManifest) -> TenantResult<Self> {
        settings.validate()?;

        if settings.backend.strategy() != provider.strategy() {
            return Err(TenantError::Configuration(format!(
                "backend '{}' is configured for {} isolation but the {} provider implements {}",
                settings.backend.name(),
                settings.backend.strategy(),
                provider.name(),
                provider.strategy()
            )));
        }

        let resolver = Arc::new(NameResolver::new(provider.strategy(), settings.naming.clone())?);
        let connections = Arc::new(ConnectionManager::new(
            provider,
            resolver.clone(),
            RetryPolicy::from_settings(&settings.retry),
            settings.provisioning.require_registration,
        )?);
        let bootstrap = Arc::new(BootstrapManager::new(connections.clone(), &manifest));
        let provisioner = TenantProvisioner::new(
            connections.clone(),
            bootstrap.clone(),
            manifest,
            &settings.provisioning,
        );

        tracing::debug!(
            backend = settings.backend.name(),
            strategy = %resolver.strategy(),
            "control plane configured"
        );

        Ok(Self {
            resolver,
            connections,
            bootstrap,
            provisioner,
            storage: Arc::new(StaticStorageResolver::new(settings.object_store.clone())),
        })
    }

    /// Replace the default static object-store resolver.
    pub fn with_storage_resolver(mut self, storage: Arc<dyn StorageConfigResolver>) -> Self {
        self.storage = storage;
        self
    }

    /// Initialize the bootstrap tenant; idempotent.
    pub async fn bootstrap(&self, created_by: &str) -> TenantResult<TenantRecord> {
        self.bootstrap.initialize(created_by).await
    }

    /// Read-only bootstrap check.
    pub async fn is_bootstrapped(&self) -> TenantResult<bool> {
        self.bootstrap.is_initialized().await
    }

    pub async fn create_tenant(
        &self,
        tenant_id: &str,
        display_name: &str,
        created_by: &str,
    ) -> TenantResult<TenantRecord> {
        self.provisioner.create(tenant_id, display_name, created_by).await
    }

    pub async fn create_tenant_with_report(
        &self,
        tenant_id: &str,
        display_name: &str,
        created_by: &str,
    ) -> TenantResult<ProvisioningOutcome> {
        self.provisioner
            .create_with_report(tenant_id, display_name, created_by)
            .await
    }

    /// Live connection for a provisioned tenant.
    pub async fn get_connection(&self, tenant_id: &str) -> TenantResult<Arc<P::Connection>> {
        let tenant_id = self.resolver.lookup_tenant_id(tenant_id)?;
        self.connections.get_connection(&tenant_id).await
    }

    pub fn resolve_isolation_boundary(&self, tenant_id: &str) -> TenantResult<IsolationBoundary> {
        let tenant_id = self.resolver.lookup_tenant_id(tenant_id)?;
        self.resolver.resolve_isolation_boundary(&tenant_id)
    }

    pub fn resolve_object_prefix(&self, tenant_id: &str) -> TenantResult<String> {
        let tenant_id = self.resolver.parse_tenant_id(tenant_id)?;
        Ok(self.resolver.resolve_object_prefix(&tenant_id))
    }

    /// Object-store client configuration scoped to the tenant's prefix.
    pub fn object_storage(&self, tenant_id: &str) -> TenantResult<ObjectStoreConfig> {
        let prefix = self.resolve_object_prefix(tenant_id)?;
        self.storage.resolve(&prefix)
    }

    /// Registry record, read from the backend.
    pub async fn get_tenant(&self, tenant_id: &str) -> TenantResult<Option<TenantRecord>> {
        let tenant_id = self.resolver.lookup_tenant_id(tenant_id)?;
        self.connections.registry().await?.find(&tenant_id).await
    }

    pub async fn list_tenants(&self) -> TenantResult<Vec<TenantRecord>> {
        self.connections.registry().await?.list().await
    }

    pub async fn rename_tenant(
        &self,
        tenant_id: &str,
        display_name: &str,
        updated_by: &str,
    ) -> TenantResult<TenantRecord> {
        let tenant_id = self.resolver.parse_tenant_id(tenant_id)?;
        self.connections
            .registry()
            .await?
            .rename(&tenant_id, display_name, updated_by)
            .await
    }

    /// Close one tenant's cached connection.
    pub async fn close_tenant(&self, tenant_id: &str) -> TenantResult<bool> {
        let tenant_id = self.resolver.lookup_tenant_id(tenant_id)?;
        self.connections.close_connection(&tenant_id).await
    }

    /// Close every cached connection.
    pub async fn shutdown(&self) -> TenantResult<()> {
        tracing::info!(cached = self.connections.cached_tenants().len(), "control plane shutting down");
        self.connections.close_all().await
    }

    pub fn resolver(&self) -> &Arc<NameResolver> {
        &self.resolver
    }

    pub fn connections(&self) -> &Arc<ConnectionManager<P>> {
        &self.connections
    }

    pub fn bootstrap_manager(&self) -> &Arc<BootstrapManager<P>> {
        &self.bootstrap
    }

    pub fn provisioner(&self) -> &TenantProvisioner<P> {
        &self.provisioner
    }
}

impl ControlPlane<SeaOrmProvider> {
    /// Control plane over PostgreSQL or SQLite, as configured.
    pub fn connect(settings: &TenancySettings, manifest: SchemaManifest) -> TenantResult<Self> {
        let provider = SeaOrmProvider::from_settings(settings)?;
        Self::new(Arc::new(provider), settings, manifest)
    }
}

impl ControlPlane<MemoryProvider> {
    /// Control plane over a fresh in-memory backend.
    pub fn in_memory(settings: &TenancySettings, manifest: SchemaManifest) -> TenantResult<Self> {
        let BackendSettings::Memory { strategy } = &settings.backend else {
            return Err(TenantError::Configuration(format!(
                "in_memory requires the memory backend, found '{}'",
                settings.backend.name()
            )));
        };

        Self::new(Arc::new(MemoryProvider::new(*strategy)), settings, manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::IsolationStrategy;

    #[test]
    fn test_strategy_mismatch() {
        let provider = Arc::new(MemoryProvider::new(IsolationStrategy::DatabasePerTenant));
        let settings = TenancySettings::memory(IsolationStrategy::SchemaPerTenant);

        assert!(matches!(
            ControlPlane::new(provider, &settings, SchemaManifest::new()),
            Err(TenantError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = TenancySettings::memory(IsolationStrategy::SchemaPerTenant);
        settings.naming.schema_template = "fixed".to_string();

        assert!(matches!(
            ControlPlane::in_memory(&settings, SchemaManifest::new()),
            Err(TenantError::Configuration(_))
        ));
    }

    #[test]
    fn test_in_memory_requires_memory_backend() {
        let settings = TenancySettings::postgres("postgres://localhost/app");
        assert!(ControlPlane::in_memory(&settings, SchemaManifest::new()).is_err());
    }

    #[test]
    fn test_resolution_without_backend_io() {
        let settings = TenancySettings::memory(IsolationStrategy::SchemaPerTenant).with_prefix("corp", "prod");
        let plane = ControlPlane::in_memory(&settings, SchemaManifest::new()).unwrap();

        assert_eq!(
            plane.resolve_isolation_boundary("acme").unwrap(),
            IsolationBoundary::schema("tenant_acme")
        );
        assert_eq!(plane.resolve_object_prefix("acme").unwrap(), "acme/corp/prod/");
        assert!(plane.resolve_isolation_boundary("bad-id").is_err());
        // no bucket configured
        assert!(plane.object_storage("acme").is_err());
    }
}
