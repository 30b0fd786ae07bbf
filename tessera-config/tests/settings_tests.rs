//! Integration tests for tessera-config

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tessera_config::*;

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_load_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "tessera.toml",
        r#"
        [backend]
        kind = "postgres"
        url = "postgres://app@localhost/documents"

        [naming]
        schema_template = "ws_{id}"
        namespace = "corp"
        environment = "prod"

        [retry]
        max_attempts = 4
        initial_backoff = 50
        operation_timeout = 10
        "#,
    );

    let settings = SettingsBuilder::new().add_file(&path).build().unwrap();

    assert_eq!(
        settings.backend,
        BackendSettings::Postgres {
            url: "postgres://app@localhost/documents".to_string()
        }
    );
    assert_eq!(settings.backend.strategy(), IsolationStrategy::SchemaPerTenant);
    assert_eq!(settings.naming.schema_template, "ws_{id}");
    assert_eq!(settings.naming.namespace, "corp");
    assert_eq!(settings.retry.max_attempts, 4);
    assert_eq!(settings.retry.initial_backoff, Duration::from_millis(50));
    assert_eq!(settings.retry.operation_timeout, Duration::from_secs(10));
    // untouched sections keep their defaults
    assert_eq!(settings.pool, PoolSettings::default());
}

#[test]
fn test_later_file_overrides_earlier() {
    let dir = tempfile::tempdir().unwrap();
    let base = write_file(
        &dir,
        "base.json",
        r#"{"backend": {"kind": "sqlite", "root_dir": "/srv/tenants"}, "naming": {"environment": "dev"}}"#,
    );
    let prod = write_file(&dir, "prod.toml", "[naming]\nenvironment = \"prod\"\n");

    let settings = SettingsBuilder::new()
        .add_file(&base)
        .add_file(&prod)
        .build()
        .unwrap();

    assert_eq!(settings.backend.strategy(), IsolationStrategy::DatabasePerTenant);
    assert_eq!(settings.naming.environment, "prod");
}

#[test]
fn test_missing_file_is_load_error() {
    let result = SettingsBuilder::new()
        .add_file("/nonexistent/tessera.toml")
        .build();

    assert!(matches!(result, Err(ConfigError::LoadError(_))));
}

#[test]
fn test_invalid_template_in_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "bad.toml", "[naming]\npath_template = \"shared.db\"\n");

    let result = SettingsBuilder::new().add_file(&path).build();

    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_numeric_env_values_for_text_fields() {
    unsafe {
        std::env::set_var("TESSERA_NUMERIC_NAMING__ENVIRONMENT", "2024");
        std::env::set_var("TESSERA_NUMERIC_OBJECT_STORE__BUCKET", "1234");
        std::env::set_var("TESSERA_NUMERIC_RETRY__MAX_ATTEMPTS", "5");
    }

    let settings = SettingsBuilder::new()
        .load_env_with_prefix("TESSERA_NUMERIC")
        .build()
        .unwrap();

    assert_eq!(settings.naming.environment, "2024");
    assert_eq!(settings.object_store.bucket, "1234");
    assert_eq!(settings.retry.max_attempts, 5);

    unsafe {
        std::env::remove_var("TESSERA_NUMERIC_NAMING__ENVIRONMENT");
        std::env::remove_var("TESSERA_NUMERIC_OBJECT_STORE__BUCKET");
        std::env::remove_var("TESSERA_NUMERIC_RETRY__MAX_ATTEMPTS");
    }
}
