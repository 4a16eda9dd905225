//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles config directory
//! discovery, environment detection, and layering of file and environment
//! variable sources on top of the compiled defaults.

use config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::CmdflowConfig;
use crate::constants::env_vars;

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: CmdflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment, None)
    }

    /// Load configuration from a specific directory with an explicit environment.
    ///
    /// `env_overrides` replaces the process environment as the source of
    /// `CMDFLOW_*` variables, which keeps tests isolated from each other.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_layers(&config_directory, environment, env_overrides)?;
        config.validate()?;

        info!(
            environment = %environment,
            remote = %config.remote.address(),
            max_connections = config.remote.max_connections,
            max_retries = config.retry.max_retries,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests and embedding callers)
    pub fn from_config(config: CmdflowConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &CmdflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn load_layers(
        config_directory: &Path,
        environment: &str,
        env_overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<CmdflowConfig> {
        let base_file = config_directory.join("cmdflow.toml");
        let env_file = config_directory.join(format!("cmdflow.{environment}.toml"));

        let env_source = Environment::with_prefix(env_vars::CONFIG_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env_overrides);

        let layered = Config::builder()
            .add_source(Config::try_from(&CmdflowConfig::default())?)
            .add_source(File::from(base_file.as_path()).required(false))
            .add_source(File::from(env_file.as_path()).required(false))
            .add_source(env_source)
            .build()
            .map_err(|e| ConfigurationError::load_error(config_directory.display().to_string(), e))?;

        layered
            .try_deserialize::<CmdflowConfig>()
            .map_err(|e| ConfigurationError::load_error(config_directory.display().to_string(), e))
    }

    fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var(env_vars::CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
