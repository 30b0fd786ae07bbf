//! Settings types consumed by the tenancy core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How tenants are physically separated from each other.
///
/// Exactly one strategy is active for a deployment, and it follows from the
/// backend in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// One schema per tenant inside a shared database (PostgreSQL).
    #[default]
    SchemaPerTenant,
    /// One database file per tenant (SQLite).
    DatabasePerTenant,
}

impl IsolationStrategy {
    /// Stable textual form, as persisted in the registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaPerTenant => "schema_per_tenant",
            Self::DatabasePerTenant => "database_per_tenant",
        }
    }
}

impl std::fmt::Display for IsolationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IsolationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema_per_tenant" => Ok(Self::SchemaPerTenant),
            "database_per_tenant" => Ok(Self::DatabasePerTenant),
            other => Err(format!("unknown isolation strategy: {}", other)),
        }
    }
}

/// Backend selection and its connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSettings {
    /// Shared PostgreSQL database, one schema per tenant.
    Postgres {
        /// Connection URL of the shared database.
        url: String,
    },
    /// One SQLite file per tenant below `root_dir`.
    Sqlite {
        /// Directory the path template is resolved against.
        root_dir: PathBuf,
    },
    /// In-process backend for tests and local development.
    Memory {
        #[serde(default)]
        strategy: IsolationStrategy,
    },
}

impl BackendSettings {
    /// The isolation strategy this backend supports.
    pub fn strategy(&self) -> IsolationStrategy {
        match self {
            Self::Postgres { .. } => IsolationStrategy::SchemaPerTenant,
            Self::Sqlite { .. } => IsolationStrategy::DatabasePerTenant,
            Self::Memory { strategy } => *strategy,
        }
    }

    /// Short backend name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres { .. } => "postgres",
            Self::Sqlite { .. } => "sqlite",
            Self::Memory { .. } => "memory",
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::Memory {
            strategy: IsolationStrategy::SchemaPerTenant,
        }
    }
}

/// Connection pool sizing and timeouts, applied to every tenant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connect timeout, in seconds when serialized.
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Idle timeout, in seconds when serialized.
    #[serde(default = "default_idle_timeout", with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Emit SQL statement logs from the driver.
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            sqlx_logging: false,
        }
    }
}

/// Naming templates and the reserved system identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingSettings {
    /// Schema name template; `{id}` is replaced by the tenant id.
    #[serde(default = "default_schema_template")]
    pub schema_template: String,

    /// Database file template, relative to the SQLite root directory.
    #[serde(default = "default_path_template")]
    pub path_template: String,

    /// Object-store namespace segment (may be empty).
    #[serde(default)]
    pub namespace: String,

    /// Object-store environment segment (may be empty).
    #[serde(default)]
    pub environment: String,

    /// Tenant ids starting with this prefix are reserved for the system.
    #[serde(default = "default_system_prefix")]
    pub system_prefix: String,

    /// Id of the bootstrap tenant hosting the registry.
    #[serde(default = "default_bootstrap_id")]
    pub bootstrap_id: String,
}

fn default_schema_template() -> String {
    "tenant_{id}".to_string()
}

fn default_path_template() -> String {
    "data/tenant_{id}/store.db".to_string()
}

fn default_system_prefix() -> String {
    "_sys".to_string()
}

fn default_bootstrap_id() -> String {
    "_sys_bootstrap_".to_string()
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            schema_template: default_schema_template(),
            path_template: default_path_template(),
            namespace: String::new(),
            environment: String::new(),
            system_prefix: default_system_prefix(),
            bootstrap_id: default_bootstrap_id(),
        }
    }
}

impl NamingSettings {
    /// Whether `id` falls under the reserved system prefix.
    pub fn is_reserved(&self, id: &str) -> bool {
        has_reserved_prefix(id, &self.system_prefix)
    }
}

/// Case-insensitive prefix match against a reserved system prefix. An empty
/// prefix reserves nothing.
pub fn has_reserved_prefix(id: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }

    id.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Provisioning policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    /// Refuse connections to tenants without a registry row.
    #[serde(default = "default_true")]
    pub require_registration: bool,

    /// Treat index creation failures as fatal.
    #[serde(default)]
    pub strict_indexes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            require_registration: true,
            strict_indexes: false,
        }
    }
}

/// Bounded retry applied to retryable backend errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff", with = "duration_millis")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "duration_millis")]
    pub max_backoff: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single backend call.
    #[serde(default = "default_operation_timeout", with = "duration_secs")]
    pub operation_timeout: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

/// Object-store client parameters shared by all tenants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreSettings {
    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub credentials_profile: Option<String>,
}

/// Root settings object for the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenancySettings {
    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub naming: NamingSettings,

    #[serde(default)]
    pub provisioning: ProvisioningSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub object_store: ObjectStoreSettings,
}

impl TenancySettings {
    /// Settings for a PostgreSQL deployment with defaults elsewhere.
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            backend: BackendSettings::Postgres { url: url.into() },
            ..Default::default()
        }
    }

    /// Settings for a SQLite deployment rooted at `root_dir`.
    pub fn sqlite(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendSettings::Sqlite {
                root_dir: root_dir.into(),
            },
            ..Default::default()
        }
    }

    /// Settings for the in-memory backend.
    pub fn memory(strategy: IsolationStrategy) -> Self {
        Self {
            backend: BackendSettings::Memory { strategy },
            ..Default::default()
        }
    }

    /// Set the object-store namespace and environment segments.
    pub fn with_prefix(mut self, namespace: impl Into<String>, environment: impl Into<String>) -> Self {
        self.naming.namespace = namespace.into();
        self.naming.environment = environment.into();
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_strategy() {
        assert_eq!(
            TenancySettings::postgres("postgres://localhost/docs").backend.strategy(),
            IsolationStrategy::SchemaPerTenant
        );
        assert_eq!(
            TenancySettings::sqlite("/var/lib/tessera").backend.strategy(),
            IsolationStrategy::DatabasePerTenant
        );
        assert_eq!(
            TenancySettings::memory(IsolationStrategy::DatabasePerTenant)
                .backend
                .strategy(),
            IsolationStrategy::DatabasePerTenant
        );
    }

    #[test]
    fn test_strategy_round_trip_text() {
        for strategy in [
            IsolationStrategy::SchemaPerTenant,
            IsolationStrategy::DatabasePerTenant,
        ] {
            assert_eq!(strategy.as_str().parse::<IsolationStrategy>(), Ok(strategy));
        }
        assert!("per_row".parse::<IsolationStrategy>().is_err());
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let settings: TenancySettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, TenancySettings::default());
        assert_eq!(settings.naming.schema_template, "tenant_{id}");
        assert_eq!(settings.retry.initial_backoff, Duration::from_millis(100));
        assert!(settings.provisioning.require_registration);
    }

    #[test]
    fn test_tagged_backend() {
        let settings: TenancySettings = serde_json::from_str(
            r#"{"backend": {"kind": "sqlite", "root_dir": "/srv/tenants"}}"#,
        )
        .unwrap();
        assert_eq!(
            settings.backend,
            BackendSettings::Sqlite {
                root_dir: PathBuf::from("/srv/tenants")
            }
        );
    }
}
