//! Tenant registry
//!
//! The registry is the durable catalog of provisioned tenants. It lives in
//! the `tenant_registry` table inside the bootstrap tenant's own boundary and
//! is the single source of truth: existence checks always re-read it from the
//! backend.

use crate::error::{BackendError, BackendResult, TenantError, TenantResult};
use crate::retry::RetryPolicy;
use crate::tenant::{TenantId, TenantRecord};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;

/// Persistence for registry rows.
///
/// Implement this over the bootstrap tenant's connection.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Find a record by tenant id
    async fn find(&self, tenant_id: &TenantId) -> BackendResult<Option<TenantRecord>>;

    /// Find the single record with `is_system = true`
    async fn find_system(&self) -> BackendResult<Option<TenantRecord>>;

    /// Insert a record; a duplicate id fails with [`BackendError::Conflict`].
    async fn insert(&self, record: &TenantRecord) -> BackendResult<()>;

    /// All records, ordered by tenant id
    async fn list(&self) -> BackendResult<Vec<TenantRecord>>;

    /// Update the display name. Returns `false` if no row matched.
    async fn update_display_name(
        &self,
        tenant_id: &TenantId,
        display_name: &str,
        updated_by: &str,
        updated_at: DateTime<Utc>,
    ) -> BackendResult<bool>;

    /// Delete the row only if id, `created_at` and `created_by` all match.
    /// Returns `true` if a row was deleted.
    async fn remove_matching(&self, record: &TenantRecord) -> BackendResult<bool>;
}

/// Registry repository with retry and invariant checks.
#[derive(Clone)]
pub struct TenantRegistry {
    store: Arc<dyn RegistryStore>,
    retry: RetryPolicy,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Authoritative lookup; never served from a cache.
    pub async fn find(&self, tenant_id: &TenantId) -> TenantResult<Option<TenantRecord>> {
        self.retry
            .run("registry.find", || self.store.find(tenant_id))
            .await
            .map_err(|e| TenantError::backend(tenant_id.as_str(), e))
    }

    pub async fn exists(&self, tenant_id: &TenantId) -> TenantResult<bool> {
        Ok(self.find(tenant_id).await?.is_some())
    }

    /// Record of the bootstrap tenant, if seeded.
    pub async fn system_record(&self) -> TenantResult<Option<TenantRecord>> {
        self.retry
            .run("registry.find_system", || self.store.find_system())
            .await
            .map_err(|e| TenantError::backend("<system>", e))
    }

    /// Insert a new record.
    ///
    /// A second system record is rejected. A duplicate id maps to
    /// [`TenantError::TenantExists`]. The insert is attempted once.
    pub async fn register(&self, record: &TenantRecord) -> TenantResult<()> {
        record.validate()?;

        if record.is_system {
            if let Some(existing) = self.system_record().await? {
                if existing.tenant_id != record.tenant_id {
                    return Err(TenantError::Configuration(format!(
                        "system tenant '{}' is already registered",
                        existing.tenant_id
                    )));
                }
            }
        }

        match self.retry.run_once(self.store.insert(record)).await {
            Ok(()) => {
                tracing::debug!(tenant_id = %record.tenant_id, "registry row inserted");
                Ok(())
            }
            Err(BackendError::Conflict(_)) => {
                Err(TenantError::TenantExists(record.tenant_id.to_string()))
            }
            Err(e) => Err(TenantError::backend(record.tenant_id.as_str(), e)),
        }
    }

    pub async fn list(&self) -> TenantResult<Vec<TenantRecord>> {
        self.retry
            .run("registry.list", || self.store.list())
            .await
            .map_err(|e| TenantError::backend("<all>", e))
    }

    /// Change a tenant's display name, the only mutable field.
    pub async fn rename(
        &self,
        tenant_id: &TenantId,
        display_name: &str,
        updated_by: &str,
    ) -> TenantResult<TenantRecord> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(TenantError::Configuration(
                "display name must not be empty".to_string(),
            ));
        }

        let updated_at = Utc::now().trunc_subsecs(6);
        let updated = self
            .retry
            .run("registry.rename", || {
                self.store
                    .update_display_name(tenant_id, display_name, updated_by, updated_at)
            })
            .await
            .map_err(|e| TenantError::backend(tenant_id.as_str(), e))?;

        if !updated {
            return Err(TenantError::TenantNotProvisioned(tenant_id.to_string()));
        }

        self.find(tenant_id)
            .await?
            .ok_or_else(|| TenantError::TenantNotProvisioned(tenant_id.to_string()))
    }

    /// Remove a row this process wrote during a failed provisioning run.
    pub(crate) async fn remove_partial(&self, record: &TenantRecord) -> TenantResult<bool> {
        self.retry
            .run("registry.remove_partial", || self.store.remove_matching(record))
            .await
            .map_err(|e| TenantError::backend(record.tenant_id.as_str(), e))
    }
}

impl std::fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRegistry")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::IsolationBoundary;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[derive(Default)]
    struct MockStore {
        rows: Mutex<BTreeMap<TenantId, TenantRecord>>,
    }

    #[async_trait]
    impl RegistryStore for MockStore {
        async fn find(&self, tenant_id: &TenantId) -> BackendResult<Option<TenantRecord>> {
            Ok(self.rows.lock().get(tenant_id).cloned())
        }

        async fn find_system(&self) -> BackendResult<Option<TenantRecord>> {
            Ok(self.rows.lock().values().find(|r| r.is_system).cloned())
        }

        async fn insert(&self, record: &TenantRecord) -> BackendResult<()> {
            let mut rows = self.rows.lock();
            if rows.contains_key(&record.tenant_id) {
                return Err(BackendError::Conflict(record.tenant_id.to_string()));
            }
            rows.insert(record.tenant_id.clone(), record.clone());
            Ok(())
        }

        async fn list(&self) -> BackendResult<Vec<TenantRecord>> {
            Ok(self.rows.lock().values().cloned().collect())
        }

        async fn update_display_name(
            &self,
            tenant_id: &TenantId,
            display_name: &str,
            updated_by: &str,
            updated_at: DateTime<Utc>,
        ) -> BackendResult<bool> {
            match self.rows.lock().get_mut(tenant_id) {
                Some(row) => {
                    row.display_name = display_name.to_string();
                    row.updated_by = updated_by.to_string();
                    row.updated_at = updated_at;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn remove_matching(&self, record: &TenantRecord) -> BackendResult<bool> {
            let mut rows = self.rows.lock();
            let matches = rows.get(&record.tenant_id).is_some_and(|row| {
                row.created_at == record.created_at && row.created_by == record.created_by
            });
            if matches {
                rows.remove(&record.tenant_id);
            }
            Ok(matches)
        }
    }

    fn registry() -> TenantRegistry {
        TenantRegistry::new(Arc::new(MockStore::default()), RetryPolicy::none(Duration::from_secs(1)))
    }

    fn record(id: &str) -> TenantRecord {
        let id = TenantId::parse(id, "_sys").unwrap();
        let boundary = IsolationBoundary::schema(format!("tenant_{}", id));
        TenantRecord::new(id, "Display", &boundary, "admin")
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let registry = registry();
        let acme = record("acme");

        registry.register(&acme).await.unwrap();

        assert_eq!(registry.find(&acme.tenant_id).await.unwrap(), Some(acme.clone()));
        assert!(registry.exists(&acme.tenant_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_maps_to_tenant_exists() {
        let registry = registry();
        let acme = record("acme");

        registry.register(&acme).await.unwrap();
        let err = registry.register(&acme).await.unwrap_err();

        assert!(err.is_already_exists());
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_system_record() {
        let registry = registry();
        let boundary = IsolationBoundary::schema("tenant__sys_bootstrap_");
        let first = TenantRecord::system(TenantId::parse_format("_sys_bootstrap_").unwrap(), &boundary, "installer");
        let second = TenantRecord::system(TenantId::parse_format("_sys_other_").unwrap(), &boundary, "installer");

        registry.register(&first).await.unwrap();
        assert!(matches!(
            registry.register(&second).await,
            Err(TenantError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_rename() {
        let registry = registry();
        let acme = record("acme");
        registry.register(&acme).await.unwrap();

        let renamed = registry.rename(&acme.tenant_id, "Acme Corporation", "ops").await.unwrap();

        assert_eq!(renamed.display_name, "Acme Corporation");
        assert_eq!(renamed.updated_by, "ops");
        assert_eq!(renamed.created_by, "admin");

        let missing = TenantId::parse("globex", "_sys").unwrap();
        assert!(matches!(
            registry.rename(&missing, "Globex", "ops").await,
            Err(TenantError::TenantNotProvisioned(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_partial_only_touches_own_row() {
        let registry = registry();
        let ours = record("acme");
        registry.register(&ours).await.unwrap();

        let mut theirs = ours.clone();
        theirs.created_by = "other-process".to_string();

        assert!(!registry.remove_partial(&theirs).await.unwrap());
        assert!(registry.remove_partial(&ours).await.unwrap());
        assert!(!registry.exists(&ours.tenant_id).await.unwrap());
    }
}
