//! Bootstrap of the system tenant
//!
//! The registry lives inside a reserved tenant's own boundary, so that
//! boundary has to exist and hold a system row before any business tenant
//! can be provisioned. [`BootstrapManager::initialize`] gets there
//! idempotently; [`BootstrapManager::state`] only looks.

use crate::backend::BackendProvider;
use crate::connection::ConnectionManager;
use crate::error::{TenantError, TenantResult};
use crate::manifest::SchemaManifest;
use crate::schema::SchemaInstaller;
use crate::tenant::TenantRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Progress of the bootstrap tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    Uninitialized,
    BoundaryCreated,
    SchemaApplied,
    Registered,
    Ready,
}

impl BootstrapState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::BoundaryCreated => "boundary_created",
            Self::SchemaApplied => "schema_applied",
            Self::Registered => "registered",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn failed(stage: BootstrapState, err: impl fmt::Display) -> TenantError {
    TenantError::Bootstrap {
        stage,
        message: err.to_string(),
    }
}

/// Creates and inspects the bootstrap tenant.
pub struct BootstrapManager<P: BackendProvider> {
    connections: Arc<ConnectionManager<P>>,
    manifest: SchemaManifest,
    init_lock: Mutex<()>,
}

impl<P: BackendProvider> BootstrapManager<P> {
    /// The bootstrap boundary receives the registry table plus the
    /// application manifest.
    pub fn new(connections: Arc<ConnectionManager<P>>, app_manifest: &SchemaManifest) -> Self {
        Self {
            connections,
            manifest: SchemaManifest::registry().merge(app_manifest),
            init_lock: Mutex::new(()),
        }
    }

    pub fn manifest(&self) -> &SchemaManifest {
        &self.manifest
    }

    /// Current state, observed without creating anything.
    pub async fn state(&self) -> TenantResult<BootstrapState> {
        Ok(self.inspect().await?.0)
    }

    pub async fn is_initialized(&self) -> TenantResult<bool> {
        Ok(self.state().await? == BootstrapState::Ready)
    }

    /// Record of the bootstrap tenant, if bootstrap has completed.
    pub async fn system_record(&self) -> TenantResult<Option<TenantRecord>> {
        Ok(self.inspect().await?.1)
    }

    /// Bring the bootstrap tenant to [`BootstrapState::Ready`].
    ///
    /// Returns the existing record unchanged when already initialized. A
    /// failed step leaves whatever was created in place.
    pub async fn initialize(&self, created_by: &str) -> TenantResult<TenantRecord> {
        let _guard = self.init_lock.lock().await;

        if let (BootstrapState::Ready, Some(record)) = self.inspect().await? {
            tracing::debug!(tenant_id = %record.tenant_id, "bootstrap already complete");
            return Ok(record);
        }

        let resolver = self.connections.resolver();
        let bootstrap_id = resolver.bootstrap_id().clone();
        let boundary = resolver
            .resolve_isolation_boundary(&bootstrap_id)
            .map_err(|e| failed(BootstrapState::Uninitialized, e))?;

        let conn = self
            .connections
            .connect_for_provisioning(&bootstrap_id)
            .await
            .map_err(|e| failed(BootstrapState::Uninitialized, e))?;
        tracing::info!(tenant_id = %bootstrap_id, boundary = %boundary, "bootstrap boundary ready");

        let installer = SchemaInstaller::new(
            self.connections.provider().as_ref(),
            self.connections.retry_policy(),
        );
        let indexes = installer
            .apply(&conn, &boundary, &self.manifest)
            .await
            .map_err(|e| failed(BootstrapState::BoundaryCreated, e))?;

        let setup = installer
            .verify(&conn, &boundary, &self.manifest)
            .await
            .map_err(|e| failed(BootstrapState::BoundaryCreated, e))?;
        if !setup.tables_complete() {
            return Err(failed(
                BootstrapState::BoundaryCreated,
                format!("missing tables after schema apply: {}", setup.missing_tables.join(", ")),
            ));
        }
        tracing::info!(
            tenant_id = %bootstrap_id,
            indexes_created = indexes.succeeded,
            indexes_failed = indexes.failed_count(),
            "bootstrap schema applied"
        );

        let registry = self
            .connections
            .registry()
            .await
            .map_err(|e| failed(BootstrapState::SchemaApplied, e))?;
        let record = TenantRecord::system(bootstrap_id, &boundary, created_by);

        let record = match registry.register(&record).await {
            Ok(()) => record,
            // Another process seeded it first
            Err(e) if e.is_already_exists() => registry
                .system_record()
                .await
                .map_err(|e| failed(BootstrapState::SchemaApplied, e))?
                .ok_or_else(|| failed(BootstrapState::SchemaApplied, "system record vanished after conflict"))?,
            Err(e) => return Err(failed(BootstrapState::SchemaApplied, e)),
        };

        tracing::info!(
            tenant_id = %record.tenant_id,
            state = %BootstrapState::Ready,
            "bootstrap complete"
        );
        Ok(record)
    }

    async fn inspect(&self) -> TenantResult<(BootstrapState, Option<TenantRecord>)> {
        let bootstrap_id = self.connections.resolver().bootstrap_id();

        let Some(conn) = self.connections.existing_connection(bootstrap_id).await? else {
            return Ok((BootstrapState::Uninitialized, None));
        };

        let boundary = self
            .connections
            .resolver()
            .resolve_isolation_boundary(bootstrap_id)?;
        let installer = SchemaInstaller::new(
            self.connections.provider().as_ref(),
            self.connections.retry_policy(),
        );
        let setup = installer
            .verify(&conn, &boundary, &self.manifest)
            .await
            .map_err(|e| TenantError::backend(bootstrap_id.as_str(), e))?;

        if !setup.tables_complete() {
            return Ok((BootstrapState::BoundaryCreated, None));
        }

        match self.connections.registry().await?.system_record().await? {
            Some(record) => Ok((BootstrapState::Ready, Some(record))),
            None => Ok((BootstrapState::SchemaApplied, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryProvider;
    use crate::manifest::REGISTRY_TABLE;
    use crate::naming::NameResolver;
    use crate::retry::RetryPolicy;
    use crate::tenant::IsolationStrategy;
    use std::time::Duration;
    use tessera_config::NamingSettings;

    fn bootstrap(provider: Arc<MemoryProvider>) -> BootstrapManager<MemoryProvider> {
        let resolver = NameResolver::new(IsolationStrategy::SchemaPerTenant, NamingSettings::default()).unwrap();
        let connections = ConnectionManager::new(
            provider,
            Arc::new(resolver),
            RetryPolicy::none(Duration::from_secs(1)),
            true,
        )
        .unwrap();
        BootstrapManager::new(Arc::new(connections), &SchemaManifest::new())
    }

    #[tokio::test]
    async fn test_state_check_has_no_side_effects() {
        let provider = Arc::new(MemoryProvider::new(IsolationStrategy::SchemaPerTenant));
        let manager = bootstrap(provider.clone());

        assert_eq!(manager.state().await.unwrap(), BootstrapState::Uninitialized);
        assert!(!manager.is_initialized().await.unwrap());
        assert!(provider.boundaries().is_empty());
        assert_eq!(provider.stats(), Default::default());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let provider = Arc::new(MemoryProvider::new(IsolationStrategy::SchemaPerTenant));
        let manager = bootstrap(provider.clone());

        let first = manager.initialize("installer").await.unwrap();
        assert!(first.is_system);
        assert_eq!(first.schema_name.as_deref(), Some("tenant__sys_bootstrap_"));
        assert!(manager.is_initialized().await.unwrap());

        let stats = provider.stats();
        let second = manager.initialize("someone-else").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.stats(), stats);
    }

    #[tokio::test]
    async fn test_partial_schema_is_reported() {
        let provider = Arc::new(MemoryProvider::new(IsolationStrategy::SchemaPerTenant));
        provider.fail_statement(REGISTRY_TABLE);
        let manager = bootstrap(provider.clone());

        let err = manager.initialize("installer").await.unwrap_err();
        assert!(matches!(
            err,
            TenantError::Bootstrap {
                stage: BootstrapState::BoundaryCreated,
                ..
            }
        ));
        // boundary is left in place
        assert!(provider.has_boundary("tenant__sys_bootstrap_"));
        assert_eq!(manager.state().await.unwrap(), BootstrapState::BoundaryCreated);

        provider.clear_faults();
        manager.initialize("installer").await.unwrap();
        assert_eq!(manager.state().await.unwrap(), BootstrapState::Ready);
    }
}
