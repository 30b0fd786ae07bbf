//! Object-store configuration per tenant.

use crate::error::{TenantError, TenantResult};
use serde::{Deserialize, Serialize};
use tessera_config::ObjectStoreSettings;

/// Client configuration for one tenant's slice of the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Tenant-first key prefix; every key the tenant writes starts with it
    pub key_prefix: String,
    pub credentials_profile: Option<String>,
}

impl ObjectStoreConfig {
    /// Full object key for a tenant-relative path.
    pub fn object_key(&self, path: &str) -> String {
        format!("{}{}", self.key_prefix, path.trim_start_matches('/'))
    }

    /// Whether `key` falls inside this tenant's prefix.
    pub fn owns_key(&self, key: &str) -> bool {
        key.starts_with(&self.key_prefix)
    }
}

/// Turns a resolved name prefix into a client configuration.
pub trait StorageConfigResolver: Send + Sync {
    fn resolve(&self, key_prefix: &str) -> TenantResult<ObjectStoreConfig>;
}

/// Resolver backed by static settings: one bucket, tenants split by prefix.
#[derive(Debug, Clone)]
pub struct StaticStorageResolver {
    settings: ObjectStoreSettings,
}

impl StaticStorageResolver {
    pub fn new(settings: ObjectStoreSettings) -> Self {
        Self { settings }
    }
}

impl StorageConfigResolver for StaticStorageResolver {
    fn resolve(&self, key_prefix: &str) -> TenantResult<ObjectStoreConfig> {
        if self.settings.bucket.trim().is_empty() {
            return Err(TenantError::Configuration(
                "object_store.bucket is not configured".to_string(),
            ));
        }

        Ok(ObjectStoreConfig {
            bucket: self.settings.bucket.clone(),
            region: self.settings.region.clone(),
            endpoint: self.settings.endpoint.clone(),
            key_prefix: key_prefix.to_string(),
            credentials_profile: self.settings.credentials_profile.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_static() {
        let resolver = StaticStorageResolver::new(ObjectStoreSettings {
            bucket: "documents".to_string(),
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        });

        let config = resolver.resolve("acme/corp/prod/").unwrap();
        assert_eq!(config.bucket, "documents");
        assert_eq!(config.object_key("/invoices/2026.pdf"), "acme/corp/prod/invoices/2026.pdf");
        assert!(config.owns_key("acme/corp/prod/x"));
        assert!(!config.owns_key("acme2/corp/prod/x"));
    }

    #[test]
    fn test_missing_bucket() {
        let resolver = StaticStorageResolver::new(ObjectStoreSettings::default());
        assert!(matches!(
            resolver.resolve("acme/"),
            Err(TenantError::Configuration(_))
        ));
    }
}
