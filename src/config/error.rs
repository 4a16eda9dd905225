//! Configuration Error Types
//!
//! Errors raised while loading, merging and validating engine configuration.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Layered sources could not be merged or deserialized
    #[error("Failed to load configuration from {source_description}: {error}")]
    LoadError {
        source_description: String,
        error: String,
    },

    /// Aggregated validation failures
    #[error("Configuration validation failed: {}", problems.join("; "))]
    Invalid { problems: Vec<String> },
}

impl ConfigurationError {
    pub fn load_error<S: Into<String>, E: std::fmt::Display>(source: S, error: E) -> Self {
        Self::LoadError {
            source_description: source.into(),
            error: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::load_error("layered configuration sources", error)
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
