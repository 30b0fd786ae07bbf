//! In-memory backend
//!
//! Models boundaries, tables, indexes and registry rows in process memory.
//! Counts every backend operation and can inject faults, which makes it the
//! backend of choice for tests and local development.
//!
//! ```rust,ignore
//! let provider = Arc::new(MemoryProvider::new(IsolationStrategy::SchemaPerTenant));
//! provider.fail_statement("ix_documents_title");
//!
//! let plane = ControlPlane::new(provider.clone(), &settings, manifest)?;
//! plane.bootstrap("installer").await?;
//! assert_eq!(provider.stats().boundaries_created, 1);
//! ```

use super::{BackendProvider, BoundaryInventory};
use crate::error::{BackendError, BackendResult};
use crate::manifest::{DdlKind, DdlStatement, REGISTRY_TABLE, SqlDialect};
use crate::registry::RegistryStore;
use crate::tenant::{IsolationBoundary, IsolationStrategy, TenantId, TenantRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct BoundaryState {
    tables: BTreeSet<String>,
    indexes: BTreeSet<String>,
    rows: BTreeMap<TenantId, TenantRecord>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_statements: HashSet<String>,
    skipped_tables: HashSet<String>,
    transient_open_failures: u32,
    fail_after_registry_insert: bool,
    fail_next_registry_lookup: bool,
    open_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    boundaries_created: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    statements_executed: AtomicU64,
    registry_writes: AtomicU64,
}

/// Snapshot of operation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub boundaries_created: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub statements_executed: u64,
    pub registry_writes: u64,
}

#[derive(Debug, Default)]
struct Shared {
    boundaries: Mutex<HashMap<String, BoundaryState>>,
    faults: Mutex<Faults>,
    counters: Counters,
}

/// In-memory [`BackendProvider`].
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    strategy: IsolationStrategy,
    shared: Arc<Shared>,
}

impl MemoryProvider {
    pub fn new(strategy: IsolationStrategy) -> Self {
        Self {
            strategy,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.shared.counters;
        MemoryStats {
            boundaries_created: c.boundaries_created.load(Ordering::SeqCst),
            connections_opened: c.connections_opened.load(Ordering::SeqCst),
            connections_closed: c.connections_closed.load(Ordering::SeqCst),
            statements_executed: c.statements_executed.load(Ordering::SeqCst),
            registry_writes: c.registry_writes.load(Ordering::SeqCst),
        }
    }

    /// Names of every boundary created so far.
    pub fn boundaries(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.boundaries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_boundary(&self, name: &str) -> bool {
        self.shared.boundaries.lock().contains_key(name)
    }

    /// Make the statement creating `object` (table or index name) fail.
    pub fn fail_statement(&self, object: impl Into<String>) {
        self.shared.faults.lock().failing_statements.insert(object.into());
    }

    /// Report success for `table`'s creation without creating it.
    pub fn skip_table(&self, table: impl Into<String>) {
        self.shared.faults.lock().skipped_tables.insert(table.into());
    }

    /// Fail the next `count` opens with a transient error.
    pub fn fail_opens(&self, count: u32) {
        self.shared.faults.lock().transient_open_failures = count;
    }

    /// Write the next registry row, then report a failure.
    pub fn fail_after_next_registry_insert(&self) {
        self.shared.faults.lock().fail_after_registry_insert = true;
    }

    /// Fail the next registry lookup by tenant id with a permanent error.
    pub fn fail_next_registry_lookup(&self) {
        self.shared.faults.lock().fail_next_registry_lookup = true;
    }

    /// Delay every open, widening race windows in concurrency tests.
    pub fn set_open_delay(&self, delay: Duration) {
        self.shared.faults.lock().open_delay = Some(delay);
    }

    /// Drop all injected faults.
    pub fn clear_faults(&self) {
        *self.shared.faults.lock() = Faults::default();
    }

    fn with_boundary<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut BoundaryState) -> BackendResult<T>,
    ) -> BackendResult<T> {
        with_boundary(&self.shared, name, f)
    }
}

fn with_boundary<T>(
    shared: &Shared,
    name: &str,
    f: impl FnOnce(&mut BoundaryState) -> BackendResult<T>,
) -> BackendResult<T> {
    let mut boundaries = shared.boundaries.lock();
    match boundaries.get_mut(name) {
        Some(state) => f(state),
        None => Err(BackendError::Permanent(format!("no such boundary: {}", name))),
    }
}

/// Connection to one in-memory boundary.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    boundary: String,
}

impl MemoryConnection {
    /// Sequence number of the open that produced this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }
}

#[async_trait]
impl BackendProvider for MemoryProvider {
    type Connection = MemoryConnection;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn strategy(&self) -> IsolationStrategy {
        self.strategy
    }

    fn dialect(&self) -> SqlDialect {
        match self.strategy {
            IsolationStrategy::SchemaPerTenant => SqlDialect::Postgres,
            IsolationStrategy::DatabasePerTenant => SqlDialect::Sqlite,
        }
    }

    async fn boundary_exists(&self, boundary: &IsolationBoundary) -> BackendResult<bool> {
        Ok(self.has_boundary(&boundary.name))
    }

    async fn create_boundary(&self, boundary: &IsolationBoundary) -> BackendResult<bool> {
        let mut boundaries = self.shared.boundaries.lock();
        if boundaries.contains_key(&boundary.name) {
            return Ok(false);
        }

        boundaries.insert(boundary.name.clone(), BoundaryState::default());
        self.shared
            .counters
            .boundaries_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn open(&self, boundary: &IsolationBoundary) -> BackendResult<Self::Connection> {
        let delay = {
            let mut faults = self.shared.faults.lock();
            if faults.transient_open_failures > 0 {
                faults.transient_open_failures -= 1;
                return Err(BackendError::Transient(format!(
                    "connection refused opening {}",
                    boundary
                )));
            }
            faults.open_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.has_boundary(&boundary.name) {
            return Err(BackendError::Permanent(format!("no such boundary: {}", boundary.name)));
        }

        let id = self
            .shared
            .counters
            .connections_opened
            .fetch_add(1, Ordering::SeqCst)
            + 1;

        Ok(MemoryConnection {
            id,
            boundary: boundary.name.clone(),
        })
    }

    async fn close(&self, _conn: Self::Connection) -> BackendResult<()> {
        self.shared
            .counters
            .connections_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, conn: &Self::Connection, statement: &DdlStatement) -> BackendResult<()> {
        {
            let faults = self.shared.faults.lock();
            if faults.failing_statements.contains(statement.object_name()) {
                return Err(BackendError::Permanent(format!(
                    "injected failure creating {}",
                    statement.object_name()
                )));
            }
            if statement.is_table() && faults.skipped_tables.contains(statement.object_name()) {
                return Ok(());
            }
        }

        self.with_boundary(&conn.boundary, |state| match &statement.kind {
            DdlKind::CreateTable { table } => {
                state.tables.insert(table.clone());
                Ok(())
            }
            DdlKind::CreateIndex { index, table } => {
                if !state.tables.contains(table) {
                    return Err(BackendError::Permanent(format!("no such table: {}", table)));
                }
                state.indexes.insert(index.clone());
                Ok(())
            }
        })?;

        self.shared
            .counters
            .statements_executed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn inspect(
        &self,
        conn: &Self::Connection,
        _boundary: &IsolationBoundary,
    ) -> BackendResult<BoundaryInventory> {
        self.with_boundary(&conn.boundary, |state| {
            Ok(BoundaryInventory {
                tables: state.tables.clone(),
                indexes: state.indexes.clone(),
            })
        })
    }

    fn registry(
        &self,
        _conn: Arc<Self::Connection>,
        boundary: &IsolationBoundary,
    ) -> Arc<dyn RegistryStore> {
        Arc::new(MemoryRegistryStore {
            boundary: boundary.name.clone(),
            shared: self.shared.clone(),
        })
    }
}

/// Registry rows held in the bootstrap boundary's state.
struct MemoryRegistryStore {
    boundary: String,
    shared: Arc<Shared>,
}

impl MemoryRegistryStore {
    fn with_rows<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<TenantId, TenantRecord>) -> BackendResult<T>,
    ) -> BackendResult<T> {
        with_boundary(&self.shared, &self.boundary, |state| {
            if !state.tables.contains(REGISTRY_TABLE) {
                return Err(BackendError::Permanent(format!(
                    "no such table: {}",
                    REGISTRY_TABLE
                )));
            }
            f(&mut state.rows)
        })
    }

    fn count_write(&self) {
        self.shared
            .counters
            .registry_writes
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn find(&self, tenant_id: &TenantId) -> BackendResult<Option<TenantRecord>> {
        if std::mem::take(&mut self.shared.faults.lock().fail_next_registry_lookup) {
            return Err(BackendError::Permanent(format!(
                "injected failure reading registry row {}",
                tenant_id
            )));
        }

        self.with_rows(|rows| Ok(rows.get(tenant_id).cloned()))
    }

    async fn find_system(&self) -> BackendResult<Option<TenantRecord>> {
        self.with_rows(|rows| Ok(rows.values().find(|r| r.is_system).cloned()))
    }

    async fn insert(&self, record: &TenantRecord) -> BackendResult<()> {
        let fail_after = std::mem::take(&mut self.shared.faults.lock().fail_after_registry_insert);

        self.with_rows(|rows| {
            if rows.contains_key(&record.tenant_id) {
                return Err(BackendError::Conflict(format!(
                    "duplicate key value violates unique constraint: tenant_id={}",
                    record.tenant_id
                )));
            }
            rows.insert(record.tenant_id.clone(), record.clone());
            Ok(())
        })?;
        self.count_write();

        if fail_after {
            return Err(BackendError::Permanent(
                "connection lost before commit acknowledgement".to_string(),
            ));
        }

        Ok(())
    }

    async fn list(&self) -> BackendResult<Vec<TenantRecord>> {
        self.with_rows(|rows| Ok(rows.values().cloned().collect()))
    }

    async fn update_display_name(
        &self,
        tenant_id: &TenantId,
        display_name: &str,
        updated_by: &str,
        updated_at: DateTime<Utc>,
    ) -> BackendResult<bool> {
        let updated = self.with_rows(|rows| match rows.get_mut(tenant_id) {
            Some(row) => {
                row.display_name = display_name.to_string();
                row.updated_by = updated_by.to_string();
                row.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        })?;

        if updated {
            self.count_write();
        }
        Ok(updated)
    }

    async fn remove_matching(&self, record: &TenantRecord) -> BackendResult<bool> {
        let removed = self.with_rows(|rows| {
            let matches = rows.get(&record.tenant_id).is_some_and(|row| {
                row.created_at == record.created_at && row.created_by == record.created_by
            });
            if matches {
                rows.remove(&record.tenant_id);
            }
            Ok(matches)
        })?;

        if removed {
            self.count_write();
        }
        Ok(removed)
    }
}
