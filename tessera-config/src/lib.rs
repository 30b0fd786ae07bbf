// Configuration for the Tessera tenant control plane

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{
    BackendSettings, IsolationStrategy, NamingSettings, ObjectStoreSettings, PoolSettings,
    ProvisioningSettings, RetrySettings, TenancySettings, has_reserved_prefix,
};
pub use validation::{ConfigValidator, Validate};

use std::path::PathBuf;

/// Layered settings builder.
///
/// Layers apply in order: defaults, files (in the order added), `.env`, then
/// prefixed environment variables. The merged result is validated before it
/// is returned.
pub struct SettingsBuilder {
    files: Vec<(PathBuf, Option<FileFormat>)>,
    load_dotenv: bool,
    dotenv_path: Option<PathBuf>,
    env_prefix: Option<String>,
    overlays: Vec<serde_json::Value>,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            load_dotenv: false,
            dotenv_path: None,
            env_prefix: None,
            overlays: Vec::new(),
        }
    }

    /// Add a settings file; the format is detected from its extension.
    pub fn add_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), None));
        self
    }

    /// Add a settings file with an explicit format.
    pub fn add_file_with_format(mut self, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        self.files.push((path.into(), Some(format)));
        self
    }

    /// Load a `.env` file before reading the environment.
    pub fn load_dotenv(mut self, path: Option<PathBuf>) -> Self {
        self.load_dotenv = true;
        self.dotenv_path = path;
        self
    }

    /// Read environment overrides with the default `TESSERA` prefix.
    pub fn load_env(self) -> Self {
        self.load_env_with_prefix(env::DEFAULT_PREFIX)
    }

    /// Read environment overrides with a custom prefix.
    pub fn load_env_with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Merge an explicit overlay last, above every other layer.
    pub fn overlay(mut self, value: serde_json::Value) -> Self {
        self.overlays.push(value);
        self
    }

    pub fn build(self) -> Result<TenancySettings> {
        let mut merged = serde_json::Value::Object(serde_json::Map::new());

        for (path, format) in &self.files {
            let loader = match format {
                Some(format) => ConfigLoader::new(*format),
                None => ConfigLoader::auto(path)?,
            };
            loader::merge(&mut merged, loader.load_file(path)?);
        }

        if self.load_dotenv {
            match &self.dotenv_path {
                Some(path) => {
                    dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
                }
                None => {
                    // A missing .env is fine
                    dotenvy::dotenv().ok();
                }
            }
        }

        if let Some(prefix) = &self.env_prefix {
            let template = serde_json::to_value(TenancySettings::default())
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            let env = EnvLoader::new(prefix.clone()).with_template(template);
            loader::merge(&mut merged, env.load());
        }

        for overlay in self.overlays {
            loader::merge(&mut merged, overlay);
        }

        let settings: TenancySettings = serde_json::from_value(merged)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
