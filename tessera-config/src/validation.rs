// Settings validation

use crate::settings::{BackendSettings, TenancySettings};
use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that a naming template carries the `{id}` placeholder
    pub fn has_id_placeholder(template: &str, field: &str) -> Result<()> {
        if !template.contains("{id}") {
            return Err(ConfigError::ValidationError(format!(
                "{} must contain the {{id}} placeholder",
                field
            )));
        }
        Ok(())
    }

    /// Validate a PostgreSQL connection URL
    pub fn is_postgres_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("postgres://") && !value.starts_with("postgresql://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a postgres:// URL",
                field
            )));
        }
        Ok(())
    }

    /// Validate an identifier in tenant-id form: `[A-Za-z_][A-Za-z0-9_]*`, at most 30 chars
    pub fn is_identifier(value: &str, field: &str) -> Result<()> {
        let mut chars = value.chars();
        let valid_head = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_head || !valid_tail || value.len() > 30 {
            return Err(ConfigError::ValidationError(format!(
                "{} must match [A-Za-z_][A-Za-z0-9_]* and be at most 30 characters",
                field
            )));
        }
        Ok(())
    }
}

impl Validate for TenancySettings {
    fn validate(&self) -> Result<()> {
        match &self.backend {
            BackendSettings::Postgres { url } => {
                ConfigValidator::is_postgres_url(url, "backend.url")?;
            }
            BackendSettings::Sqlite { root_dir } => {
                ConfigValidator::not_empty(&root_dir.to_string_lossy(), "backend.root_dir")?;
            }
            BackendSettings::Memory { .. } => {}
        }

        ConfigValidator::in_range(self.pool.max_connections, 1, 1000, "pool.max_connections")?;
        ConfigValidator::in_range(
            self.pool.min_connections,
            0,
            self.pool.max_connections,
            "pool.min_connections",
        )?;

        let naming = &self.naming;
        ConfigValidator::has_id_placeholder(&naming.schema_template, "naming.schema_template")?;
        ConfigValidator::has_id_placeholder(&naming.path_template, "naming.path_template")?;
        ConfigValidator::not_empty(&naming.system_prefix, "naming.system_prefix")?;
        ConfigValidator::is_identifier(&naming.bootstrap_id, "naming.bootstrap_id")?;
        if !naming.is_reserved(&naming.bootstrap_id) {
            return Err(ConfigError::ValidationError(
                "naming.bootstrap_id must start with naming.system_prefix".to_string(),
            ));
        }

        ConfigValidator::in_range(self.retry.max_attempts, 1, 20, "retry.max_attempts")?;
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.retry.operation_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "retry.operation_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(5, 1, 10, "field").is_ok());
        assert!(ConfigValidator::in_range(0, 1, 10, "field").is_err());
        assert!(ConfigValidator::in_range(11, 1, 10, "field").is_err());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(ConfigValidator::is_identifier("_sys_bootstrap_", "id").is_ok());
        assert!(ConfigValidator::is_identifier("9lives", "id").is_err());
        assert!(ConfigValidator::is_identifier("has-dash", "id").is_err());
        assert!(ConfigValidator::is_identifier("", "id").is_err());
        assert!(ConfigValidator::is_identifier(&"a".repeat(31), "id").is_err());
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(TenancySettings::default().validate().is_ok());
        assert!(TenancySettings::sqlite("/tmp/tenants").validate().is_ok());
    }

    #[test]
    fn test_rejects_template_without_placeholder() {
        let mut settings = TenancySettings::default();
        settings.naming.schema_template = "shared".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_bootstrap_outside_system_prefix() {
        let mut settings = TenancySettings::default();
        settings.naming.bootstrap_id = "registry".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bootstrap_prefix_match_ignores_case() {
        let mut settings = TenancySettings::default();
        settings.naming.bootstrap_id = "_SYS_bootstrap_".to_string();
        assert!(settings.validate().is_ok());

        settings.naming.system_prefix = "_Sys".to_string();
        settings.naming.bootstrap_id = "_sys_registry".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let settings = TenancySettings::postgres("mysql://localhost/docs");
        assert!(settings.validate().is_err());
    }
}
