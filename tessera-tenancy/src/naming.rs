//! Deterministic tenant naming
//!
//! Every name a tenant owns (schema, database file, object-store prefix) is a
//! pure function of its id and the static [`NamingSettings`]. Provisioning,
//! connection lookup and audits recompute names independently and must agree,
//! so nothing here reads shared state.
//!
//! ```rust,ignore
//! let resolver = NameResolver::new(IsolationStrategy::SchemaPerTenant, settings.naming)?;
//! let id = resolver.parse_tenant_id("acme")?;
//!
//! assert_eq!(resolver.resolve_schema_name(&id)?, "tenant_acme");
//! assert_eq!(resolver.resolve_object_prefix(&id), "acme/corp/prod/");
//! ```

use crate::error::{TenantError, TenantResult};
use crate::tenant::{IsolationBoundary, IsolationStrategy, TenantId, is_reserved};
use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;
use tessera_config::NamingSettings;

/// PostgreSQL truncates identifiers longer than this
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

const ID_PLACEHOLDER: &str = "{id}";

static SCHEMA_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("schema name pattern is valid")
});

/// Derives tenant names from templates.
#[derive(Debug, Clone)]
pub struct NameResolver {
    strategy: IsolationStrategy,
    settings: NamingSettings,
    bootstrap_id: TenantId,
}

impl NameResolver {
    /// Create a resolver for the active isolation strategy.
    ///
    /// Fails if a template lacks the `{id}` placeholder or the bootstrap id
    /// is not itself under the reserved prefix.
    pub fn new(strategy: IsolationStrategy, settings: NamingSettings) -> TenantResult<Self> {
        for (field, template) in [
            ("schema_template", &settings.schema_template),
            ("path_template", &settings.path_template),
        ] {
            if !template.contains(ID_PLACEHOLDER) {
                return Err(TenantError::Configuration(format!(
                    "naming.{} must contain {}",
                    field, ID_PLACEHOLDER
                )));
            }
        }

        let bootstrap_id = TenantId::parse_format(&settings.bootstrap_id)
            .map_err(|e| TenantError::Configuration(format!("naming.bootstrap_id: {}", e)))?;

        if !is_reserved(bootstrap_id.as_str(), &settings.system_prefix) {
            return Err(TenantError::Configuration(format!(
                "naming.bootstrap_id '{}' must start with the system prefix '{}'",
                bootstrap_id, settings.system_prefix
            )));
        }

        Ok(Self {
            strategy,
            settings,
            bootstrap_id,
        })
    }

    pub fn strategy(&self) -> IsolationStrategy {
        self.strategy
    }

    pub fn settings(&self) -> &NamingSettings {
        &self.settings
    }

    /// Id of the reserved tenant hosting the registry.
    pub fn bootstrap_id(&self) -> &TenantId {
        &self.bootstrap_id
    }

    pub fn is_bootstrap(&self, tenant_id: &TenantId) -> bool {
        tenant_id == &self.bootstrap_id
    }

    /// Validate an id a business tenant may be created under.
    pub fn parse_tenant_id(&self, raw: &str) -> TenantResult<TenantId> {
        TenantId::parse(raw, &self.settings.system_prefix)
    }

    /// Validate an id for lookups; the bootstrap id is accepted here.
    pub fn lookup_tenant_id(&self, raw: &str) -> TenantResult<TenantId> {
        if raw == self.bootstrap_id.as_str() {
            return Ok(self.bootstrap_id.clone());
        }

        self.parse_tenant_id(raw)
    }

    /// Schema name from `schema_template`; only valid under schema isolation.
    pub fn resolve_schema_name(&self, tenant_id: &TenantId) -> TenantResult<String> {
        if self.strategy != IsolationStrategy::SchemaPerTenant {
            return Err(TenantError::Configuration(format!(
                "backend uses {} isolation; schema names are not available",
                self.strategy
            )));
        }

        let name = self.apply(&self.settings.schema_template, tenant_id);

        if name.len() > MAX_SCHEMA_NAME_LEN {
            return Err(TenantError::Configuration(format!(
                "schema name '{}' exceeds {} characters",
                name, MAX_SCHEMA_NAME_LEN
            )));
        }

        if !SCHEMA_NAME_PATTERN.is_match(&name) {
            return Err(TenantError::Configuration(format!(
                "schema template produced an invalid identifier '{}'",
                name
            )));
        }

        Ok(name)
    }

    /// Relative database path from `path_template`; only valid under
    /// database isolation.
    pub fn resolve_storage_path(&self, tenant_id: &TenantId) -> TenantResult<String> {
        if self.strategy != IsolationStrategy::DatabasePerTenant {
            return Err(TenantError::Configuration(format!(
                "backend uses {} isolation; storage paths are not available",
                self.strategy
            )));
        }

        let path = self.apply(&self.settings.path_template, tenant_id);

        // Must stay below the configured root
        let escapes = Path::new(&path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if escapes {
            return Err(TenantError::Configuration(format!(
                "path template produced '{}', which is not a relative path below the root",
                path
            )));
        }

        Ok(path)
    }

    /// Object-store key prefix: `{tenant_id}/{namespace}/{environment}/`.
    ///
    /// The tenant id always comes first so one prefix scopes every access
    /// policy and cost report to a single tenant. Empty segments are dropped
    /// and the result ends with exactly one `/`.
    pub fn resolve_object_prefix(&self, tenant_id: &TenantId) -> String {
        let segments: Vec<&str> = [
            tenant_id.as_str(),
            self.settings.namespace.as_str(),
            self.settings.environment.as_str(),
        ]
        .into_iter()
        .flat_map(|segment| segment.split('/'))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

        let mut prefix = segments.join("/");
        prefix.push('/');
        prefix
    }

    /// Boundary for the active strategy.
    pub fn resolve_isolation_boundary(&self, tenant_id: &TenantId) -> TenantResult<IsolationBoundary> {
        match self.strategy {
            IsolationStrategy::SchemaPerTenant => {
                Ok(IsolationBoundary::schema(self.resolve_schema_name(tenant_id)?))
            }
            IsolationStrategy::DatabasePerTenant => {
                Ok(IsolationBoundary::database(self.resolve_storage_path(tenant_id)?))
            }
        }
    }

    fn apply(&self, template: &str, tenant_id: &TenantId) -> String {
        template.replace(ID_PLACEHOLDER, tenant_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_resolver() -> NameResolver {
        let settings = NamingSettings {
            namespace: "corp".to_string(),
            environment: "prod".to_string(),
            ..Default::default()
        };
        NameResolver::new(IsolationStrategy::SchemaPerTenant, settings).unwrap()
    }

    fn database_resolver() -> NameResolver {
        NameResolver::new(IsolationStrategy::DatabasePerTenant, NamingSettings::default()).unwrap()
    }

    #[test]
    fn test_schema_name() {
        let resolver = schema_resolver();
        let id = resolver.parse_tenant_id("acme").unwrap();

        assert_eq!(resolver.resolve_schema_name(&id).unwrap(), "tenant_acme");
        // deterministic
        assert_eq!(
            resolver.resolve_schema_name(&id).unwrap(),
            resolver.resolve_schema_name(&id).unwrap()
        );
    }

    #[test]
    fn test_schema_name_requires_schema_strategy() {
        let resolver = database_resolver();
        let id = resolver.parse_tenant_id("acme").unwrap();

        assert!(matches!(
            resolver.resolve_schema_name(&id),
            Err(TenantError::Configuration(_))
        ));
    }

    #[test]
    fn test_schema_name_length_limit() {
        let settings = NamingSettings {
            schema_template: format!("{}_{{id}}", "w".repeat(40)),
            ..Default::default()
        };
        let resolver = NameResolver::new(IsolationStrategy::SchemaPerTenant, settings).unwrap();
        let id = resolver.parse_tenant_id(&"a".repeat(30)).unwrap();

        assert!(resolver.resolve_schema_name(&id).is_err());
    }

    #[test]
    fn test_storage_path() {
        let resolver = database_resolver();
        let id = resolver.parse_tenant_id("acme").unwrap();

        assert_eq!(
            resolver.resolve_storage_path(&id).unwrap(),
            "data/tenant_acme/store.db"
        );
        assert!(resolver.resolve_schema_name(&id).is_err());
    }

    #[test]
    fn test_storage_path_must_stay_relative() {
        let settings = NamingSettings {
            path_template: "../{id}.db".to_string(),
            ..Default::default()
        };
        let resolver = NameResolver::new(IsolationStrategy::DatabasePerTenant, settings).unwrap();
        let id = resolver.parse_tenant_id("acme").unwrap();

        assert!(resolver.resolve_storage_path(&id).is_err());
    }

    #[test]
    fn test_object_prefix() {
        let resolver = schema_resolver();
        let id = resolver.parse_tenant_id("acme").unwrap();

        assert_eq!(resolver.resolve_object_prefix(&id), "acme/corp/prod/");
    }

    #[test]
    fn test_object_prefix_skips_empty_segments() {
        let settings = NamingSettings {
            namespace: String::new(),
            environment: "/prod/".to_string(),
            ..Default::default()
        };
        let resolver = NameResolver::new(IsolationStrategy::SchemaPerTenant, settings).unwrap();
        let id = resolver.parse_tenant_id("acme").unwrap();

        assert_eq!(resolver.resolve_object_prefix(&id), "acme/prod/");

        let bare = database_resolver();
        assert_eq!(bare.resolve_object_prefix(&id), "acme/");
    }

    #[test]
    fn test_object_prefix_is_tenant_first() {
        let resolver = schema_resolver();
        for raw in ["acme", "globex", "_initech", "T1"] {
            let id = resolver.parse_tenant_id(raw).unwrap();
            assert!(resolver.resolve_object_prefix(&id).starts_with(&format!("{}/", raw)));
        }
    }

    #[test]
    fn test_isolation_boundary_dispatch() {
        let id = TenantId::parse("acme", "_sys").unwrap();

        assert_eq!(
            schema_resolver().resolve_isolation_boundary(&id).unwrap(),
            IsolationBoundary::schema("tenant_acme")
        );
        assert_eq!(
            database_resolver().resolve_isolation_boundary(&id).unwrap(),
            IsolationBoundary::database("data/tenant_acme/store.db")
        );
    }

    #[test]
    fn test_reserved_ids() {
        let resolver = schema_resolver();

        assert!(matches!(
            resolver.parse_tenant_id("_sysprefix_anything_"),
            Err(TenantError::InvalidTenantId { .. })
        ));
        assert!(resolver.parse_tenant_id("_sys_bootstrap_").is_err());
        assert_eq!(
            resolver.lookup_tenant_id("_sys_bootstrap_").unwrap(),
            *resolver.bootstrap_id()
        );
        assert!(resolver.lookup_tenant_id("_sys_other").is_err());
    }

    #[test]
    fn test_rejects_template_without_placeholder() {
        let settings = NamingSettings {
            schema_template: "shared".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            NameResolver::new(IsolationStrategy::SchemaPerTenant, settings),
            Err(TenantError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_bootstrap_id_outside_prefix() {
        let settings = NamingSettings {
            bootstrap_id: "registry".to_string(),
            ..Default::default()
        };

        assert!(NameResolver::new(IsolationStrategy::SchemaPerTenant, settings).is_err());
    }

    #[test]
    fn test_bootstrap_id_agrees_with_settings_validation() {
        use tessera_config::{TenancySettings, Validate};

        let mut settings = TenancySettings::default();
        settings.naming.bootstrap_id = "_SYS_bootstrap_".to_string();

        assert!(settings.validate().is_ok());
        assert!(NameResolver::new(IsolationStrategy::SchemaPerTenant, settings.naming).is_ok());
    }
}
