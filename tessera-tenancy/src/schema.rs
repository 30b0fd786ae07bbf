//! Applying schema manifests to a boundary
//!
//! Table creation is fatal on failure. Index creation is a best-effort
//! sub-step whose outcome is reported in an [`IndexReport`] instead of being
//! swallowed.

use crate::backend::BackendProvider;
use crate::error::BackendError;
use crate::manifest::{SchemaManifest, render_ddl};
use crate::retry::RetryPolicy;
use crate::tenant::IsolationBoundary;
use std::fmt;

/// Outcome of the index sub-step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    /// Indexes created by this run
    pub succeeded: usize,
    /// Indexes already present
    pub skipped: usize,
    /// Indexes that failed, with the backend's reason
    pub failed: Vec<IndexFailure>,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexFailure {
    pub index: String,
    pub error: BackendError,
}

/// A required table could not be created.
#[derive(Debug, Clone, PartialEq)]
pub struct TableFailure {
    pub table: String,
    pub error: BackendError,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "creating table {} failed: {}", self.table, self.error)
    }
}

/// What a boundary is missing relative to its manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupReport {
    pub missing_tables: Vec<String>,
    pub missing_indexes: Vec<String>,
}

impl SetupReport {
    /// True when every required table exists.
    pub fn tables_complete(&self) -> bool {
        self.missing_tables.is_empty()
    }
}

/// Applies manifests through a backend provider.
pub struct SchemaInstaller<'a, P: BackendProvider> {
    provider: &'a P,
    retry: &'a RetryPolicy,
}

impl<'a, P: BackendProvider> SchemaInstaller<'a, P> {
    pub fn new(provider: &'a P, retry: &'a RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Create every table, then every index, in manifest order.
    ///
    /// Statements are create-if-absent, so re-applying a manifest is safe.
    pub async fn apply(
        &self,
        conn: &P::Connection,
        boundary: &IsolationBoundary,
        manifest: &SchemaManifest,
    ) -> Result<IndexReport, TableFailure> {
        let statements = render_ddl(boundary, manifest, self.provider.dialect());
        let (tables, indexes): (Vec<_>, Vec<_>) = statements.iter().partition(|s| s.is_table());

        for statement in tables {
            self.retry
                .run("schema.create_table", || self.provider.execute(conn, statement))
                .await
                .map_err(|error| TableFailure {
                    table: statement.object_name().to_string(),
                    error,
                })?;
        }

        let mut report = IndexReport::default();
        if indexes.is_empty() {
            return Ok(report);
        }

        let present = match self.provider.inspect(conn, boundary).await {
            Ok(inventory) => inventory.indexes,
            Err(e) => {
                tracing::debug!(boundary = %boundary, error = %e, "index inventory unavailable");
                Default::default()
            }
        };

        for statement in indexes {
            let name = statement.object_name();
            if present.contains(name) {
                report.skipped += 1;
                continue;
            }

            match self
                .retry
                .run("schema.create_index", || self.provider.execute(conn, statement))
                .await
            {
                Ok(()) => report.succeeded += 1,
                Err(error) => {
                    tracing::warn!(
                        boundary = %boundary,
                        index = name,
                        error = %error,
                        "index creation failed"
                    );
                    report.failed.push(IndexFailure {
                        index: name.to_string(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Compare the boundary's inventory with the manifest.
    pub async fn verify(
        &self,
        conn: &P::Connection,
        boundary: &IsolationBoundary,
        manifest: &SchemaManifest,
    ) -> Result<SetupReport, BackendError> {
        let inventory = self
            .retry
            .run("schema.inspect", || self.provider.inspect(conn, boundary))
            .await?;

        Ok(SetupReport {
            missing_tables: manifest
                .table_names()
                .filter(|t| !inventory.has_table(t))
                .map(str::to_string)
                .collect(),
            missing_indexes: manifest
                .index_names()
                .filter(|i| !inventory.has_index(i))
                .map(str::to_string)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryProvider;
    use crate::manifest::{ColumnDef, ColumnType, IndexDef, TableDef};
    use crate::tenant::IsolationStrategy;
    use std::time::Duration;

    fn manifest() -> SchemaManifest {
        SchemaManifest::new()
            .table(TableDef::new("documents").column(ColumnDef::new("id", ColumnType::Text).primary_key()))
            .table(TableDef::new("folders").column(ColumnDef::new("id", ColumnType::Text).primary_key()))
            .index(IndexDef::new("ix_documents_id", "documents", ["id"]))
            .index(IndexDef::new("ix_folders_id", "folders", ["id"]))
    }

    async fn setup() -> (MemoryProvider, IsolationBoundary, crate::backend::MemoryConnection) {
        let provider = MemoryProvider::new(IsolationStrategy::SchemaPerTenant);
        let boundary = IsolationBoundary::schema("tenant_acme");
        provider.create_boundary(&boundary).await.unwrap();
        let conn = provider.open(&boundary).await.unwrap();
        (provider, boundary, conn)
    }

    #[tokio::test]
    async fn test_apply_and_reapply() {
        let (provider, boundary, conn) = setup().await;
        let retry = RetryPolicy::none(Duration::from_secs(1));
        let installer = SchemaInstaller::new(&provider, &retry);

        let first = installer.apply(&conn, &boundary, &manifest()).await.unwrap();
        assert_eq!(first.succeeded, 2);
        assert!(first.is_clean());

        let second = installer.apply(&conn, &boundary, &manifest()).await.unwrap();
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.skipped, 2);

        let setup = installer.verify(&conn, &boundary, &manifest()).await.unwrap();
        assert_eq!(setup, SetupReport::default());
    }

    #[tokio::test]
    async fn test_index_failure_is_reported_not_fatal() {
        let (provider, boundary, conn) = setup().await;
        provider.fail_statement("ix_folders_id");
        let retry = RetryPolicy::none(Duration::from_secs(1));
        let installer = SchemaInstaller::new(&provider, &retry);

        let report = installer.apply(&conn, &boundary, &manifest()).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failed[0].index, "ix_folders_id");

        let setup = installer.verify(&conn, &boundary, &manifest()).await.unwrap();
        assert!(setup.tables_complete());
        assert_eq!(setup.missing_indexes, vec!["ix_folders_id".to_string()]);
    }

    #[tokio::test]
    async fn test_table_failure_is_fatal() {
        let (provider, boundary, conn) = setup().await;
        provider.fail_statement("folders");
        let retry = RetryPolicy::none(Duration::from_secs(1));
        let installer = SchemaInstaller::new(&provider, &retry);

        let failure = installer.apply(&conn, &boundary, &manifest()).await.unwrap_err();
        assert_eq!(failure.table, "folders");
    }
}
