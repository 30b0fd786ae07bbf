//! Error types for the tenant control plane.

use crate::bootstrap::BootstrapState;
use crate::provisioner::ProvisioningStep;
use std::time::Duration;
use thiserror::Error;

/// Tenant control plane errors
#[derive(Error, Debug)]
pub enum TenantError {
    #[error("Invalid tenant identifier '{tenant_id}': {reason}")]
    InvalidTenantId { tenant_id: String, reason: String },

    #[error("Tenant already exists: {0}")]
    TenantExists(String),

    #[error("Tenant is not provisioned: {0}")]
    TenantNotProvisioned(String),

    #[error("Bootstrap failed at {stage}: {message}")]
    Bootstrap {
        stage: BootstrapState,
        message: String,
    },

    #[error("Provisioning of '{tenant_id}' failed at {step}: {message}")]
    Provisioning {
        tenant_id: String,
        step: ProvisioningStep,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error for tenant '{tenant_id}': {source}")]
    Backend {
        tenant_id: String,
        #[source]
        source: BackendError,
    },
}

impl TenantError {
    pub(crate) fn invalid_id(tenant_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTenantId {
            tenant_id: tenant_id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn backend(tenant_id: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            tenant_id: tenant_id.into(),
            source,
        }
    }

    /// True for duplicate provisioning; idempotent callers treat it as success.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::TenantExists(_))
    }

    /// True when the underlying backend failure was transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { source, .. } if source.is_retryable())
    }
}

/// Failures reported by a storage backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connection acquisition or loss; worth retrying.
    #[error("Transient backend failure: {0}")]
    Transient(String),

    #[error("Backend operation timed out after {0:?}")]
    Timeout(Duration),

    /// A write collided with an existing row.
    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Backend failure: {0}")]
    Permanent(String),
}

impl BackendError {
    /// Only connection-level failures and timeouts are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

impl From<sea_orm::DbErr> for BackendError {
    fn from(err: sea_orm::DbErr) -> Self {
        use sea_orm::{DbErr, SqlErr};

        if let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err() {
            return Self::Conflict(message);
        }

        match &err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => {
                Self::Transient(err.to_string())
            }
            DbErr::Query(runtime) | DbErr::Exec(runtime) if is_transient_runtime(runtime) => {
                Self::Transient(err.to_string())
            }
            _ => Self::Permanent(err.to_string()),
        }
    }
}

/// SQLite busy/locked and Postgres serialization, deadlock and startup codes.
#[cfg(any(feature = "postgres", feature = "sqlite"))]
const TRANSIENT_DB_CODES: [&str; 7] = ["5", "6", "261", "517", "40001", "40P01", "57P03"];

/// Connection loss or lock contention surfacing mid-statement.
#[cfg(any(feature = "postgres", feature = "sqlite"))]
fn is_transient_runtime(err: &sea_orm::RuntimeErr) -> bool {
    use sea_orm::sqlx;

    match err {
        sea_orm::RuntimeErr::SqlxError(e) => match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| TRANSIENT_DB_CODES.contains(&code.as_ref())),
            _ => false,
        },
        sea_orm::RuntimeErr::Internal(_) => false,
    }
}

#[cfg(not(any(feature = "postgres", feature = "sqlite")))]
fn is_transient_runtime(_err: &sea_orm::RuntimeErr) -> bool {
    false
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock => Self::Transient(err.to_string()),
            ErrorKind::TimedOut => Self::Transient(err.to_string()),
            _ => Self::Permanent(err.to_string()),
        }
    }
}

impl From<tessera_config::ConfigError> for TenantError {
    fn from(err: tessera_config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type for tenant operations
pub type TenantResult<T> = Result<T, TenantError>;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(BackendError::Transient("reset".into()).is_retryable());
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!BackendError::Conflict("dup".into()).is_retryable());
        assert!(!BackendError::Permanent("syntax".into()).is_retryable());
    }

    #[test]
    fn test_tenant_error_retryable_only_for_backend() {
        let err = TenantError::backend("acme", BackendError::Transient("reset".into()));
        assert!(err.is_retryable());

        assert!(!TenantError::TenantExists("acme".into()).is_retryable());
        assert!(TenantError::TenantExists("acme".into()).is_already_exists());
    }

    #[test]
    fn test_provisioning_error_names_step() {
        let err = TenantError::Provisioning {
            tenant_id: "acme".into(),
            step: ProvisioningStep::ValidateSetup,
            message: "missing table documents".into(),
        };

        let text = err.to_string();
        assert!(text.contains("acme"));
        assert!(text.contains("validate_setup"));
    }

    #[test]
    fn test_io_error_mapping() {
        let err: BackendError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, BackendError::Permanent(_)));
    }

    #[cfg(any(feature = "postgres", feature = "sqlite"))]
    #[test]
    fn test_lost_connection_mid_statement_is_retryable() {
        use sea_orm::{DbErr, RuntimeErr, sqlx};

        let reset = || {
            sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))
        };

        let err: BackendError = DbErr::Query(RuntimeErr::SqlxError(reset())).into();
        assert!(matches!(err, BackendError::Transient(_)));
        assert!(err.is_retryable());

        let err: BackendError = DbErr::Exec(RuntimeErr::SqlxError(reset())).into();
        assert!(err.is_retryable());

        let err: BackendError = DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::PoolTimedOut)).into();
        assert!(err.is_retryable());

        let err: BackendError = DbErr::Query(RuntimeErr::Internal("bad column".into())).into();
        assert!(matches!(err, BackendError::Permanent(_)));

        let err: BackendError = DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::RowNotFound)).into();
        assert!(!err.is_retryable());
    }
}
