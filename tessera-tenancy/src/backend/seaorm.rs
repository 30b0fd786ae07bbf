//! SeaORM backend for PostgreSQL and SQLite.
//!
//! PostgreSQL isolates tenants by schema. An admin pool on the shared
//! database issues `CREATE SCHEMA`, and each tenant pool pins its
//! `search_path` to the tenant schema. SQLite isolates tenants by file below
//! a root directory; each tenant gets a single-connection pool.

use super::{BackendProvider, BoundaryInventory};
use crate::error::{BackendError, BackendResult, TenantError, TenantResult};
use crate::manifest::{DdlStatement, REGISTRY_TABLE, SqlDialect};
use crate::registry::RegistryStore;
use crate::tenant::{IsolationBoundary, IsolationStrategy, TenantId, TenantRecord};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QueryResult,
    Statement, TransactionTrait,
};
use sea_query::{Alias, Expr, IntoTableRef, Order, Query, TableRef};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_config::{BackendSettings, PoolSettings, TenancySettings};
use tokio::sync::OnceCell;

enum Target {
    Postgres {
        url: String,
        admin: OnceCell<DatabaseConnection>,
    },
    Sqlite {
        root_dir: PathBuf,
    },
}

/// [`BackendProvider`] over SeaORM connection pools.
pub struct SeaOrmProvider {
    target: Target,
    pool: PoolSettings,
}

impl SeaOrmProvider {
    /// Schema-per-tenant provider on a shared PostgreSQL database.
    pub fn postgres(url: impl Into<String>, pool: PoolSettings) -> Self {
        Self {
            target: Target::Postgres {
                url: url.into(),
                admin: OnceCell::new(),
            },
            pool,
        }
    }

    /// Database-per-tenant provider storing SQLite files below `root_dir`.
    pub fn sqlite(root_dir: impl Into<PathBuf>, pool: PoolSettings) -> Self {
        Self {
            target: Target::Sqlite {
                root_dir: root_dir.into(),
            },
            pool,
        }
    }

    pub fn from_settings(settings: &TenancySettings) -> TenantResult<Self> {
        match &settings.backend {
            BackendSettings::Postgres { url } => Ok(Self::postgres(url.clone(), settings.pool.clone())),
            BackendSettings::Sqlite { root_dir } => {
                Ok(Self::sqlite(root_dir.clone(), settings.pool.clone()))
            }
            BackendSettings::Memory { .. } => Err(TenantError::Configuration(
                "the memory backend is served by MemoryProvider, not SeaOrmProvider".to_string(),
            )),
        }
    }

    /// Absolute location of a SQLite boundary.
    pub fn database_path(&self, boundary: &IsolationBoundary) -> Option<PathBuf> {
        match &self.target {
            Target::Sqlite { root_dir } => Some(root_dir.join(&boundary.name)),
            Target::Postgres { .. } => None,
        }
    }

    fn connect_options(&self, url: String) -> ConnectOptions {
        let mut options = ConnectOptions::new(url);
        options
            .max_connections(self.pool.max_connections)
            .min_connections(self.pool.min_connections)
            .connect_timeout(self.pool.connect_timeout)
            .idle_timeout(self.pool.idle_timeout)
            .sqlx_logging(self.pool.sqlx_logging);
        options
    }

    async fn admin(&self) -> BackendResult<&DatabaseConnection> {
        match &self.target {
            Target::Postgres { url, admin } => {
                admin
                    .get_or_try_init(|| async {
                        tracing::info!("opening postgres admin pool");
                        let mut options = self.connect_options(url.clone());
                        options.max_connections(2).min_connections(1);
                        Ok::<_, BackendError>(Database::connect(options).await?)
                    })
                    .await
            }
            Target::Sqlite { .. } => Err(BackendError::Permanent(
                "sqlite backend has no admin connection".to_string(),
            )),
        }
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

#[async_trait]
impl BackendProvider for SeaOrmProvider {
    type Connection = DatabaseConnection;

    fn name(&self) -> &'static str {
        match self.target {
            Target::Postgres { .. } => "postgres",
            Target::Sqlite { .. } => "sqlite",
        }
    }

    fn strategy(&self) -> IsolationStrategy {
        match self.target {
            Target::Postgres { .. } => IsolationStrategy::SchemaPerTenant,
            Target::Sqlite { .. } => IsolationStrategy::DatabasePerTenant,
        }
    }

    fn dialect(&self) -> SqlDialect {
        match self.target {
            Target::Postgres { .. } => SqlDialect::Postgres,
            Target::Sqlite { .. } => SqlDialect::Sqlite,
        }
    }

    async fn boundary_exists(&self, boundary: &IsolationBoundary) -> BackendResult<bool> {
        match &self.target {
            Target::Postgres { .. } => {
                let admin = self.admin().await?;
                let row = admin
                    .query_one(Statement::from_sql_and_values(
                        DbBackend::Postgres,
                        "SELECT 1 AS present FROM information_schema.schemata WHERE schema_name = $1",
                        [boundary.name.as_str().into()],
                    ))
                    .await?;
                Ok(row.is_some())
            }
            Target::Sqlite { root_dir } => {
                Ok(tokio::fs::try_exists(root_dir.join(&boundary.name)).await?)
            }
        }
    }

    async fn create_boundary(&self, boundary: &IsolationBoundary) -> BackendResult<bool> {
        match &self.target {
            Target::Postgres { .. } => {
                if self.boundary_exists(boundary).await? {
                    return Ok(false);
                }

                let admin = self.admin().await?;
                admin
                    .execute_unprepared(&format!(
                        "CREATE SCHEMA IF NOT EXISTS {}",
                        quote_ident(&boundary.name)
                    ))
                    .await?;
                Ok(true)
            }
            Target::Sqlite { root_dir } => {
                let path = root_dir.join(&boundary.name);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }

                // An empty file is a valid SQLite database
                match tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn open(&self, boundary: &IsolationBoundary) -> BackendResult<Self::Connection> {
        let options = match &self.target {
            Target::Postgres { url, .. } => {
                let mut options = self.connect_options(url.clone());
                options.set_schema_search_path(boundary.name.clone());
                options
            }
            Target::Sqlite { root_dir } => {
                let mut options = self.connect_options(sqlite_url(&root_dir.join(&boundary.name)));
                // SQLite serializes writers; one connection per file
                options.max_connections(1).min_connections(1);
                options
            }
        };

        Ok(Database::connect(options).await?)
    }

    async fn close(&self, conn: Self::Connection) -> BackendResult<()> {
        Ok(conn.close().await?)
    }

    async fn execute(&self, conn: &Self::Connection, statement: &DdlStatement) -> BackendResult<()> {
        conn.execute_unprepared(&statement.sql).await?;
        Ok(())
    }

    async fn inspect(
        &self,
        conn: &Self::Connection,
        boundary: &IsolationBoundary,
    ) -> BackendResult<BoundaryInventory> {
        let mut inventory = BoundaryInventory::default();

        match self.target {
            Target::Postgres { .. } => {
                let tables = conn
                    .query_all(Statement::from_sql_and_values(
                        DbBackend::Postgres,
                        "SELECT table_name::text AS name FROM information_schema.tables WHERE table_schema = $1",
                        [boundary.name.as_str().into()],
                    ))
                    .await?;
                for row in tables {
                    inventory.tables.insert(row.try_get::<String>("", "name")?);
                }

                let indexes = conn
                    .query_all(Statement::from_sql_and_values(
                        DbBackend::Postgres,
                        "SELECT indexname::text AS name FROM pg_indexes WHERE schemaname = $1",
                        [boundary.name.as_str().into()],
                    ))
                    .await?;
                for row in indexes {
                    inventory.indexes.insert(row.try_get::<String>("", "name")?);
                }
            }
            Target::Sqlite { .. } => {
                let rows = conn
                    .query_all(Statement::from_string(
                        DbBackend::Sqlite,
                        "SELECT name, type FROM sqlite_master WHERE type IN ('table', 'index')",
                    ))
                    .await?;
                for row in rows {
                    let name: String = row.try_get("", "name")?;
                    match row.try_get::<String>("", "type")?.as_str() {
                        "table" => inventory.tables.insert(name),
                        _ => inventory.indexes.insert(name),
                    };
                }
            }
        }

        Ok(inventory)
    }

    fn registry(
        &self,
        conn: Arc<Self::Connection>,
        boundary: &IsolationBoundary,
    ) -> Arc<dyn RegistryStore> {
        Arc::new(SqlRegistryStore::new(conn, boundary.schema_name()))
    }
}

const COLUMNS: [&str; 10] = [
    "tenant_id",
    "display_name",
    "is_system",
    "isolation_strategy",
    "schema_name",
    "storage_path",
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
];

/// Registry rows in the `tenant_registry` table.
pub struct SqlRegistryStore {
    conn: Arc<DatabaseConnection>,
    table: TableRef,
}

impl SqlRegistryStore {
    pub fn new(conn: Arc<DatabaseConnection>, schema: Option<&str>) -> Self {
        let table = match schema {
            Some(schema) => (Alias::new(schema), Alias::new(REGISTRY_TABLE)).into_table_ref(),
            None => Alias::new(REGISTRY_TABLE).into_table_ref(),
        };
        Self { conn, table }
    }

    fn backend(&self) -> DbBackend {
        self.conn.get_database_backend()
    }

    fn columns() -> impl Iterator<Item = Alias> {
        COLUMNS.iter().map(|c| Alias::new(*c))
    }

    async fn select_one(&self, condition: sea_query::SimpleExpr) -> BackendResult<Option<TenantRecord>> {
        let query = Query::select()
            .columns(Self::columns())
            .from(self.table.clone())
            .and_where(condition)
            .to_owned();

        match self.conn.query_one(self.backend().build(&query)).await? {
            Some(row) => Ok(Some(decode(&row)?)),
            None => Ok(None),
        }
    }
}

fn encode_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> BackendResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BackendError::Permanent(format!("bad registry timestamp '{}': {}", raw, e)))
}

fn decode(row: &QueryResult) -> BackendResult<TenantRecord> {
    let strategy: String = row.try_get("", "isolation_strategy")?;

    Ok(TenantRecord {
        tenant_id: TenantId::from_stored(row.try_get("", "tenant_id")?),
        display_name: row.try_get("", "display_name")?,
        is_system: row.try_get("", "is_system")?,
        isolation_strategy: strategy.parse().map_err(BackendError::Permanent)?,
        schema_name: row.try_get("", "schema_name")?,
        storage_path: row.try_get("", "storage_path")?,
        created_at: decode_time(&row.try_get::<String>("", "created_at")?)?,
        created_by: row.try_get("", "created_by")?,
        updated_at: decode_time(&row.try_get::<String>("", "updated_at")?)?,
        updated_by: row.try_get("", "updated_by")?,
    })
}

#[async_trait]
impl RegistryStore for SqlRegistryStore {
    async fn find(&self, tenant_id: &TenantId) -> BackendResult<Option<TenantRecord>> {
        self.select_one(Expr::col(Alias::new("tenant_id")).eq(tenant_id.as_str()))
            .await
    }

    async fn find_system(&self) -> BackendResult<Option<TenantRecord>> {
        self.select_one(Expr::col(Alias::new("is_system")).eq(true)).await
    }

    async fn insert(&self, record: &TenantRecord) -> BackendResult<()> {
        let mut insert = Query::insert();
        insert
            .into_table(self.table.clone())
            .columns(Self::columns())
            .values([
                record.tenant_id.as_str().into(),
                record.display_name.as_str().into(),
                record.is_system.into(),
                record.isolation_strategy.as_str().into(),
                record.schema_name.clone().into(),
                record.storage_path.clone().into(),
                encode_time(&record.created_at).into(),
                record.created_by.as_str().into(),
                encode_time(&record.updated_at).into(),
                record.updated_by.as_str().into(),
            ])
            .map_err(|e| BackendError::Permanent(e.to_string()))?;

        let txn = self.conn.begin().await?;
        txn.execute(self.backend().build(&insert)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn list(&self) -> BackendResult<Vec<TenantRecord>> {
        let query = Query::select()
            .columns(Self::columns())
            .from(self.table.clone())
            .order_by(Alias::new("tenant_id"), Order::Asc)
            .to_owned();

        self.conn
            .query_all(self.backend().build(&query))
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    async fn update_display_name(
        &self,
        tenant_id: &TenantId,
        display_name: &str,
        updated_by: &str,
        updated_at: DateTime<Utc>,
    ) -> BackendResult<bool> {
        let update = Query::update()
            .table(self.table.clone())
            .values([
                (Alias::new("display_name"), display_name.into()),
                (Alias::new("updated_by"), updated_by.into()),
                (Alias::new("updated_at"), encode_time(&updated_at).into()),
            ])
            .and_where(Expr::col(Alias::new("tenant_id")).eq(tenant_id.as_str()))
            .to_owned();

        let result = self.conn.execute(self.backend().build(&update)).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_matching(&self, record: &TenantRecord) -> BackendResult<bool> {
        let delete = Query::delete()
            .from_table(self.table.clone())
            .and_where(Expr::col(Alias::new("tenant_id")).eq(record.tenant_id.as_str()))
            .and_where(Expr::col(Alias::new("created_at")).eq(encode_time(&record.created_at)))
            .and_where(Expr::col(Alias::new("created_by")).eq(record.created_by.as_str()))
            .to_owned();

        let result = self.conn.execute(self.backend().build(&delete)).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("tenant_acme"), "\"tenant_acme\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_sqlite_url() {
        assert_eq!(
            sqlite_url(Path::new("/srv/tenants/data/tenant_acme/store.db")),
            "sqlite:///srv/tenants/data/tenant_acme/store.db?mode=rwc"
        );
    }

    #[test]
    fn test_time_roundtrip_at_micros() {
        let raw = "2026-03-01T12:30:45.123456Z";
        let parsed = decode_time(raw).unwrap();
        assert_eq!(encode_time(&parsed), raw);
        assert!(decode_time("yesterday").is_err());
    }

    #[test]
    fn test_from_settings() {
        let provider = SeaOrmProvider::from_settings(&TenancySettings::sqlite("/srv/tenants")).unwrap();
        assert_eq!(provider.strategy(), IsolationStrategy::DatabasePerTenant);
        assert_eq!(provider.dialect(), SqlDialect::Sqlite);
        assert_eq!(
            provider.database_path(&IsolationBoundary::database("data/tenant_acme/store.db")),
            Some(PathBuf::from("/srv/tenants/data/tenant_acme/store.db"))
        );

        let provider = SeaOrmProvider::from_settings(&TenancySettings::postgres("postgres://localhost/app")).unwrap();
        assert_eq!(provider.strategy(), IsolationStrategy::SchemaPerTenant);

        assert!(SeaOrmProvider::from_settings(&TenancySettings::default()).is_err());
    }
}
