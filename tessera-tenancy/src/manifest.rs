//! Schema manifests and DDL rendering
//!
//! A [`SchemaManifest`] is an ordered list of table and index definitions owned
//! by the application's data model. [`render_ddl`] turns a manifest into
//! statements for one isolation boundary without touching the manifest, so a
//! single manifest can be shared by every tenant.

use crate::tenant::IsolationBoundary;
use sea_query::{
    Alias, Index, IntoTableRef, PostgresQueryBuilder, SchemaStatementBuilder, SqliteQueryBuilder,
    Table, TableRef,
};
use serde::{Deserialize, Serialize};

/// Name of the registry table inside the bootstrap boundary
pub const REGISTRY_TABLE: &str = "tenant_registry";

/// Logical column types understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    BigInteger,
    Boolean,
    Timestamp,
    Json,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    /// A non-null column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            primary_key: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new<I, S>(name: impl Into<String>, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Ordered table and index definitions applied verbatim to a boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaManifest {
    tables: Vec<TableDef>,
    indexes: Vec<IndexDef>,
}

impl SchemaManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.iter().map(|i| i.name.as_str())
    }

    /// New manifest with `other`'s definitions appended; tables or indexes
    /// already present by name are kept from `self`.
    pub fn merge(&self, other: &SchemaManifest) -> SchemaManifest {
        let mut merged = self.clone();

        for table in &other.tables {
            if !merged.tables.iter().any(|t| t.name == table.name) {
                merged.tables.push(table.clone());
            }
        }

        for index in &other.indexes {
            if !merged.indexes.iter().any(|i| i.name == index.name) {
                merged.indexes.push(index.clone());
            }
        }

        merged
    }

    /// Manifest of the tenant registry hosted by the bootstrap tenant.
    pub fn registry() -> SchemaManifest {
        let table = TableDef::new(REGISTRY_TABLE)
            .column(ColumnDef::new("tenant_id", ColumnType::Text).primary_key())
            .column(ColumnDef::new("display_name", ColumnType::Text))
            .column(ColumnDef::new("is_system", ColumnType::Boolean))
            .column(ColumnDef::new("isolation_strategy", ColumnType::Text))
            .column(ColumnDef::new("schema_name", ColumnType::Text).nullable())
            .column(ColumnDef::new("storage_path", ColumnType::Text).nullable())
            .column(ColumnDef::new("created_at", ColumnType::Text))
            .column(ColumnDef::new("created_by", ColumnType::Text))
            .column(ColumnDef::new("updated_at", ColumnType::Text))
            .column(ColumnDef::new("updated_by", ColumnType::Text));

        SchemaManifest::new().table(table).index(IndexDef::new(
            "ix_tenant_registry_is_system",
            REGISTRY_TABLE,
            ["is_system"],
        ))
    }
}

/// SQL flavour to render for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlKind {
    CreateTable { table: String },
    CreateIndex { index: String, table: String },
}

/// One rendered statement and what it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    pub kind: DdlKind,
    pub sql: String,
}

impl DdlStatement {
    /// Table or index name this statement creates.
    pub fn object_name(&self) -> &str {
        match &self.kind {
            DdlKind::CreateTable { table } => table,
            DdlKind::CreateIndex { index, .. } => index,
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, DdlKind::CreateTable { .. })
    }
}

/// Render `manifest` for `boundary`, tables first, then indexes.
///
/// Under schema isolation every table reference is qualified with the
/// boundary's schema. Statements are create-if-absent.
pub fn render_ddl(
    boundary: &IsolationBoundary,
    manifest: &SchemaManifest,
    dialect: SqlDialect,
) -> Vec<DdlStatement> {
    let schema = boundary.schema_name();
    let mut statements = Vec::with_capacity(manifest.tables.len() + manifest.indexes.len());

    for table in &manifest.tables {
        let mut create = Table::create();
        create.table(table_ref(schema, &table.name)).if_not_exists();

        let pk = table.primary_key_columns();
        for column in &table.columns {
            let mut def = sea_query::ColumnDef::new(Alias::new(column.name.as_str()));
            apply_type(&mut def, column.column_type);

            if column.nullable {
                def.null();
            } else {
                def.not_null();
            }

            if column.primary_key && pk.len() == 1 {
                def.primary_key();
            }

            create.col(&mut def);
        }

        if pk.len() > 1 {
            let mut key = Index::create();
            for name in &pk {
                key.col(Alias::new(*name));
            }
            create.primary_key(&mut key);
        }

        statements.push(DdlStatement {
            kind: DdlKind::CreateTable {
                table: table.name.clone(),
            },
            sql: build(&create, dialect),
        });
    }

    for index in &manifest.indexes {
        let mut create = Index::create();
        create
            .name(index.name.as_str())
            .table(table_ref(schema, &index.table))
            .if_not_exists();

        for column in &index.columns {
            create.col(Alias::new(column.as_str()));
        }

        if index.unique {
            create.unique();
        }

        statements.push(DdlStatement {
            kind: DdlKind::CreateIndex {
                index: index.name.clone(),
                table: index.table.clone(),
            },
            sql: build(&create, dialect),
        });
    }

    statements
}

fn table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(schema) => (Alias::new(schema), Alias::new(table)).into_table_ref(),
        None => Alias::new(table).into_table_ref(),
    }
}

fn apply_type(def: &mut sea_query::ColumnDef, column_type: ColumnType) {
    match column_type {
        ColumnType::Text => def.text(),
        ColumnType::Integer => def.integer(),
        ColumnType::BigInteger => def.big_integer(),
        ColumnType::Boolean => def.boolean(),
        ColumnType::Timestamp => def.timestamp(),
        ColumnType::Json => def.json(),
        ColumnType::Binary => def.binary(),
    };
}

fn build<S: SchemaStatementBuilder>(statement: &S, dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::Postgres => statement.build(PostgresQueryBuilder),
        SqlDialect::Sqlite => statement.build(SqliteQueryBuilder),
    }
}
