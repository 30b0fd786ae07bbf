//! Per-tenant connection cache
//!
//! [`ConnectionManager`] maps tenant ids to live pooled connections. Lookups
//! of cached tenants never block. A cold tenant is constructed under that
//! tenant's own lock, so concurrent first access opens exactly one
//! connection, and work on one tenant never waits on another.
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(provider, resolver, retry, true)?;
//! let conn = manager.get_connection(&tenant_id).await?;
//! ```

use crate::backend::BackendProvider;
use crate::bootstrap::BootstrapState;
use crate::error::{TenantError, TenantResult};
use crate::naming::NameResolver;
use crate::registry::TenantRegistry;
use crate::retry::RetryPolicy;
use crate::tenant::{IsolationBoundary, TenantId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Create the boundary if it does not exist
    CreateBoundary,
    /// Only open a boundary that already exists
    ExistingOnly,
}

/// Thread-safe cache of tenant connections.
pub struct ConnectionManager<P: BackendProvider> {
    provider: Arc<P>,
    resolver: Arc<NameResolver>,
    retry: RetryPolicy,
    require_registration: bool,
    connections: DashMap<TenantId, Arc<P::Connection>>,
    locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl<P: BackendProvider> ConnectionManager<P> {
    /// Create a manager; the provider and resolver must agree on the
    /// isolation strategy.
    pub fn new(
        provider: Arc<P>,
        resolver: Arc<NameResolver>,
        retry: RetryPolicy,
        require_registration: bool,
    ) -> TenantResult<Self> {
        if provider.strategy() != resolver.strategy() {
            return Err(TenantError::Configuration(format!(
                "{} backend provides {} isolation but names resolve for {}",
                provider.name(),
                provider.strategy(),
                resolver.strategy()
            )));
        }

        Ok(Self {
            provider,
            resolver,
            retry,
            require_registration,
            connections: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn resolver(&self) -> &Arc<NameResolver> {
        &self.resolver
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Connection for a tenant, opened on first use.
    ///
    /// When registration is required, a tenant without a registry row fails
    /// with [`TenantError::TenantNotProvisioned`] and no boundary is created.
    pub async fn get_connection(&self, tenant_id: &TenantId) -> TenantResult<Arc<P::Connection>> {
        if let Some(conn) = self.cached(tenant_id) {
            return Ok(conn);
        }

        if self.require_registration && !self.resolver.is_bootstrap(tenant_id) {
            self.ensure_registered(tenant_id).await?;
        }

        self.admit(tenant_id, Admission::CreateBoundary)
            .await?
            .ok_or_else(|| TenantError::TenantNotProvisioned(tenant_id.to_string()))
    }

    /// Connection used while provisioning; skips the registration check.
    pub(crate) async fn connect_for_provisioning(
        &self,
        tenant_id: &TenantId,
    ) -> TenantResult<Arc<P::Connection>> {
        if let Some(conn) = self.cached(tenant_id) {
            return Ok(conn);
        }

        self.admit(tenant_id, Admission::CreateBoundary)
            .await?
            .ok_or_else(|| TenantError::TenantNotProvisioned(tenant_id.to_string()))
    }

    /// Connection to a tenant whose boundary already exists, or `None`.
    /// Never creates anything.
    pub async fn existing_connection(
        &self,
        tenant_id: &TenantId,
    ) -> TenantResult<Option<Arc<P::Connection>>> {
        if let Some(conn) = self.cached(tenant_id) {
            return Ok(Some(conn));
        }

        self.admit(tenant_id, Admission::ExistingOnly).await
    }

    /// Registry over the bootstrap tenant's connection.
    pub async fn registry(&self) -> TenantResult<TenantRegistry> {
        let bootstrap_id = self.resolver.bootstrap_id();
        let boundary = self.resolver.resolve_isolation_boundary(bootstrap_id)?;

        let conn = self
            .existing_connection(bootstrap_id)
            .await?
            .ok_or_else(|| TenantError::Bootstrap {
                stage: BootstrapState::Uninitialized,
                message: format!("registry boundary {} does not exist", boundary),
            })?;

        Ok(TenantRegistry::new(
            self.provider.registry(conn, &boundary),
            self.retry.clone(),
        ))
    }

    /// Whether the tenant's boundary exists, without creating it.
    pub async fn boundary_exists(&self, boundary: &IsolationBoundary) -> TenantResult<bool> {
        self.retry
            .run("boundary.exists", || self.provider.boundary_exists(boundary))
            .await
            .map_err(|e| TenantError::backend(boundary.name.as_str(), e))
    }

    /// Dispose of a tenant's connection. Returns `false` if none was cached.
    ///
    /// A construction already in flight is not interrupted; its callers and
    /// any that queue behind it share the connection it produces.
    pub async fn close_connection(&self, tenant_id: &TenantId) -> TenantResult<bool> {
        let removed = self.connections.remove(tenant_id);

        // Only drop the lock entry nobody is waiting on or holding
        self.locks
            .remove_if(tenant_id, |_, lock| Arc::strong_count(lock) == 1);

        let Some((_, conn)) = removed else {
            return Ok(false);
        };

        match Arc::try_unwrap(conn) {
            Ok(conn) => {
                self.provider
                    .close(conn)
                    .await
                    .map_err(|e| TenantError::backend(tenant_id.as_str(), e))?;
                tracing::info!(tenant_id = %tenant_id, "connection closed");
            }
            Err(_) => {
                // Pool is released when the last holder drops it
                tracing::debug!(tenant_id = %tenant_id, "connection evicted while still in use");
            }
        }

        Ok(true)
    }

    /// Close every cached connection. All are attempted; the first error is
    /// returned.
    pub async fn close_all(&self) -> TenantResult<()> {
        let mut first_error = None;

        for tenant_id in self.cached_tenants() {
            if let Err(e) = self.close_connection(&tenant_id).await {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "failed to close connection");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tenants with a cached connection, sorted.
    pub fn cached_tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_cached(&self, tenant_id: &TenantId) -> bool {
        self.connections.contains_key(tenant_id)
    }

    fn cached(&self, tenant_id: &TenantId) -> Option<Arc<P::Connection>> {
        let conn = self.connections.get(tenant_id).map(|entry| Arc::clone(entry.value()));
        if conn.is_some() {
            tracing::trace!(tenant_id = %tenant_id, "connection cache hit");
        }
        conn
    }

    async fn ensure_registered(&self, tenant_id: &TenantId) -> TenantResult<()> {
        let registry = match self.registry().await {
            Ok(registry) => registry,
            Err(TenantError::Bootstrap { .. }) => {
                return Err(TenantError::TenantNotProvisioned(tenant_id.to_string()));
            }
            Err(e) => return Err(e),
        };

        if registry.exists(tenant_id).await? {
            Ok(())
        } else {
            Err(TenantError::TenantNotProvisioned(tenant_id.to_string()))
        }
    }

    /// Slow path: construct the connection under the tenant's lock.
    async fn admit(
        &self,
        tenant_id: &TenantId,
        admission: Admission,
    ) -> TenantResult<Option<Arc<P::Connection>>> {
        let lock = self
            .locks
            .entry(tenant_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have finished while we waited
        if let Some(conn) = self.cached(tenant_id) {
            return Ok(Some(conn));
        }

        let boundary = self.resolver.resolve_isolation_boundary(tenant_id)?;

        match admission {
            Admission::CreateBoundary => {
                let created = self
                    .retry
                    .run("boundary.create", || self.provider.create_boundary(&boundary))
                    .await
                    .map_err(|e| TenantError::backend(tenant_id.as_str(), e))?;

                if created {
                    tracing::info!(tenant_id = %tenant_id, boundary = %boundary, "isolation boundary created");
                }
            }
            Admission::ExistingOnly => {
                if !self.boundary_exists(&boundary).await? {
                    return Ok(None);
                }
            }
        }

        let conn = self
            .retry
            .run("connection.open", || self.provider.open(&boundary))
            .await
            .map_err(|e| TenantError::backend(tenant_id.as_str(), e))?;

        let conn = Arc::new(conn);
        self.connections.insert(tenant_id.clone(), Arc::clone(&conn));

        tracing::info!(
            tenant_id = %tenant_id,
            boundary = %boundary,
            backend = self.provider.name(),
            "connection opened"
        );

        Ok(Some(conn))
    }
}

impl<P: BackendProvider> std::fmt::Debug for ConnectionManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("backend", &self.provider.name())
            .field("require_registration", &self.require_registration)
            .field("cached", &self.connections.len())
            .finish()
    }
}
