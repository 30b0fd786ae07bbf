//! Storage backends
//!
//! A [`BackendProvider`] knows how to create, open and inspect isolation
//! boundaries for one kind of store. The control plane is generic over it so
//! the same orchestration drives PostgreSQL schemas, SQLite files, or the
//! in-memory backend used in tests.

pub mod memory;
pub mod seaorm;

pub use memory::{MemoryConnection, MemoryProvider, MemoryStats};
pub use seaorm::SeaOrmProvider;

use crate::error::BackendResult;
use crate::manifest::{DdlStatement, SqlDialect};
use crate::registry::RegistryStore;
use crate::tenant::{IsolationBoundary, IsolationStrategy};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Tables and indexes present in a boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryInventory {
    pub tables: BTreeSet<String>,
    pub indexes: BTreeSet<String>,
}

impl BoundaryInventory {
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains(name)
    }
}

/// Backend provider trait
///
/// Implementations must make `create_boundary` create-if-absent: two
/// processes may race to create the same boundary.
#[async_trait]
pub trait BackendProvider: Send + Sync + 'static {
    /// Pooled connection bound to one boundary
    type Connection: Send + Sync + 'static;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Isolation strategy this backend implements
    fn strategy(&self) -> IsolationStrategy;

    /// Dialect DDL is rendered in
    fn dialect(&self) -> SqlDialect;

    /// Check whether the boundary exists, without creating anything.
    async fn boundary_exists(&self, boundary: &IsolationBoundary) -> BackendResult<bool>;

    /// Create the boundary if absent. Returns `true` if this call created it.
    async fn create_boundary(&self, boundary: &IsolationBoundary) -> BackendResult<bool>;

    /// Open a pooled connection scoped to an existing boundary.
    async fn open(&self, boundary: &IsolationBoundary) -> BackendResult<Self::Connection>;

    /// Dispose of a connection.
    async fn close(&self, conn: Self::Connection) -> BackendResult<()>;

    /// Execute one DDL statement.
    async fn execute(&self, conn: &Self::Connection, statement: &DdlStatement) -> BackendResult<()>;

    /// List the tables and indexes in the boundary.
    async fn inspect(
        &self,
        conn: &Self::Connection,
        boundary: &IsolationBoundary,
    ) -> BackendResult<BoundaryInventory>;

    /// Registry store over the bootstrap tenant's connection.
    fn registry(
        &self,
        conn: Arc<Self::Connection>,
        boundary: &IsolationBoundary,
    ) -> Arc<dyn RegistryStore>;
}
