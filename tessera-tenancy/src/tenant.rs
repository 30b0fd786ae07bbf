//! Tenant identity and registry records

use crate::error::{TenantError, TenantResult};
use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub use tessera_config::IsolationStrategy;

static TENANT_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("tenant id pattern is valid")
});

/// Validated tenant identifier.
///
/// 1 to 30 characters from `[A-Za-z0-9_]`, not starting with a digit. Ids
/// beginning with the reserved system prefix are rejected for business tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Maximum identifier length
    pub const MAX_LEN: usize = 30;

    /// Parse a business tenant id, rejecting anything under `reserved_prefix`.
    pub fn parse(raw: &str, reserved_prefix: &str) -> TenantResult<Self> {
        let id = Self::parse_format(raw)?;

        if is_reserved(raw, reserved_prefix) {
            return Err(TenantError::invalid_id(
                raw,
                format!("identifiers starting with '{}' are reserved", reserved_prefix),
            ));
        }

        Ok(id)
    }

    /// Format and length checks only; used for the bootstrap id.
    pub(crate) fn parse_format(raw: &str) -> TenantResult<Self> {
        if raw.is_empty() {
            return Err(TenantError::invalid_id(raw, "must not be empty"));
        }

        if raw.len() > Self::MAX_LEN {
            return Err(TenantError::invalid_id(
                raw,
                format!("must be at most {} characters", Self::MAX_LEN),
            ));
        }

        if !TENANT_ID_PATTERN.is_match(raw) {
            return Err(TenantError::invalid_id(
                raw,
                "must match [A-Za-z_][A-Za-z0-9_]*",
            ));
        }

        Ok(Self(raw.to_string()))
    }

    /// Wrap an id read back from the registry.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Case-insensitive prefix match against the reserved system prefix.
pub(crate) fn is_reserved(raw: &str, reserved_prefix: &str) -> bool {
    tessera_config::has_reserved_prefix(raw, reserved_prefix)
}

impl fmt::Display for IsolationBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.strategy {
            IsolationStrategy::SchemaPerTenant => write!(f, "schema {}", self.name),
            IsolationStrategy::DatabasePerTenant => write!(f, "database {}", self.name),
        }
    }
}

/// Registry row describing one provisioned tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: TenantId,
    pub display_name: String,
    pub is_system: bool,
    pub isolation_strategy: IsolationStrategy,
    pub schema_name: Option<String>,
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl TenantRecord {
    /// Build a business tenant record for `boundary`.
    pub fn new(
        tenant_id: TenantId,
        display_name: impl Into<String>,
        boundary: &IsolationBoundary,
        created_by: impl Into<String>,
    ) -> Self {
        // Registry timestamps round-trip through text at microsecond precision
        let now = Utc::now().trunc_subsecs(6);
        let created_by = created_by.into();

        Self {
            tenant_id,
            display_name: display_name.into(),
            is_system: false,
            isolation_strategy: boundary.strategy,
            schema_name: boundary.schema_name().map(str::to_string),
            storage_path: boundary.storage_path().map(str::to_string),
            created_at: now,
            created_by: created_by.clone(),
            updated_at: now,
            updated_by: created_by,
        }
    }

    /// Build the record for the bootstrap tenant.
    pub fn system(
        tenant_id: TenantId,
        boundary: &IsolationBoundary,
        created_by: impl Into<String>,
    ) -> Self {
        let display_name = format!("System ({})", tenant_id);
        let mut record = Self::new(tenant_id, display_name, boundary, created_by);
        record.is_system = true;
        record
    }

    /// Boundary recorded for this tenant.
    pub fn boundary(&self) -> Option<IsolationBoundary> {
        match self.isolation_strategy {
            IsolationStrategy::SchemaPerTenant => {
                self.schema_name.as_ref().map(IsolationBoundary::schema)
            }
            IsolationStrategy::DatabasePerTenant => {
                self.storage_path.as_ref().map(IsolationBoundary::database)
            }
        }
    }

    /// Exactly one of `schema_name`/`storage_path` is set, matching the strategy.
    pub fn validate(&self) -> TenantResult<()> {
        let consistent = match self.isolation_strategy {
            IsolationStrategy::SchemaPerTenant => {
                self.schema_name.is_some() && self.storage_path.is_none()
            }
            IsolationStrategy::DatabasePerTenant => {
                self.storage_path.is_some() && self.schema_name.is_none()
            }
        };

        if !consistent {
            return Err(TenantError::Configuration(format!(
                "record for '{}' does not match its {} isolation strategy",
                self.tenant_id, self.isolation_strategy
            )));
        }

        if self.display_name.trim().is_empty() {
            return Err(TenantError::Configuration(format!(
                "record for '{}' has an empty display name",
                self.tenant_id
            )));
        }

        Ok(())
    }
}
