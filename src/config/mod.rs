//! # Cmdflow Configuration System
//!
//! Typed configuration for the remote command engine and the workflow
//! orchestrator. Values are layered by [`ConfigManager`]: compiled defaults,
//! then `config/cmdflow.toml`, then `config/cmdflow.{environment}.toml`, then
//! `CMDFLOW_*` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cmdflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let remote = &manager.config().remote;
//! println!("editor host at {}:{}", remote.host, remote.port);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/cmdflow.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CmdflowConfig {
    /// Remote editor host connection settings
    pub remote: RemoteConfig,

    /// Retry budget and backoff for command execution
    pub retry: RetryConfig,

    /// Transaction compensation behaviour
    pub transaction: TransactionConfig,

    /// Workflow orchestration settings
    pub workflow: WorkflowConfig,

    /// Logging output settings
    pub logging: LoggingConfig,
}

/// How request envelopes are delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Envelope followed by a single `\n`
    #[default]
    Newline,
    /// Envelope bytes only; the response is delimited by JSON completeness
    Raw,
}

/// Remote host and connection pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    /// Pool capacity: maximum idle connections and maximum outstanding leases
    pub max_connections: usize,
    pub connection_timeout_ms: u64,
    /// Default response timeout for commands that do not set their own
    pub command_timeout_ms: u64,
    pub framing: Framing,
    /// When false every connection is discarded after one exchange
    pub reuse_connections: bool,
    pub max_response_bytes: usize,
    pub warm_pool_on_start: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: defaults::REMOTE_HOST.to_string(),
            port: defaults::REMOTE_PORT,
            max_connections: defaults::MAX_CONNECTIONS,
            connection_timeout_ms: defaults::CONNECTION_TIMEOUT_MS,
            command_timeout_ms: defaults::COMMAND_TIMEOUT_MS,
            framing: Framing::Newline,
            reuse_connections: false,
            max_response_bytes: defaults::MAX_RESPONSE_BYTES,
            warm_pool_on_start: true,
        }
    }
}

impl RemoteConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Retry configuration for command execution
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    /// Linear backoff unit: the wait before retry `n` is `n * backoff_base_ms`
    pub backoff_base_ms: u64,
    /// Whether a well-formed `success: false` reply consumes the retry budget
    pub retry_application_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            retry_application_errors: true,
        }
    }
}

impl RetryConfig {
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt) + 1))
    }
}

/// Which forward commands get their compensation executed on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationScope {
    /// Every issued command, including the one that failed
    #[default]
    Attempted,
    /// Only commands that reported success
    Succeeded,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub compensation_scope: CompensationScope,
}

/// Workflow orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub step_timeout_ms: u64,
    /// Attempt one checkpoint rollback when a step fails
    pub enable_rollback: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: defaults::STEP_TIMEOUT_MS,
            enable_rollback: true,
        }
    }
}

impl WorkflowConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; falls back to the environment default
    pub level: Option<String>,
    pub json: bool,
}

impl CmdflowConfig {
    /// Validate every section and report all problems at once
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut problems = Vec::new();

        if self.remote.host.trim().is_empty() {
            problems.push("remote.host must not be empty".to_string());
        }
        if self.remote.port == 0 {
            problems.push("remote.port must be greater than 0".to_string());
        }
        if self.remote.max_connections == 0 {
            problems.push("remote.max_connections must be greater than 0".to_string());
        }
        if self.remote.connection_timeout_ms == 0 {
            problems.push("remote.connection_timeout_ms must be greater than 0".to_string());
        }
        if self.remote.command_timeout_ms == 0 {
            problems.push("remote.command_timeout_ms must be greater than 0".to_string());
        }
        if self.remote.max_response_bytes < 2 {
            problems.push("remote.max_response_bytes is too small to hold a JSON object".to_string());
        }
        if self.retry.max_retries > defaults::MAX_RETRIES_CEILING {
            problems.push(format!(
                "retry.max_retries should not exceed {}",
                defaults::MAX_RETRIES_CEILING
            ));
        }
        if self.workflow.step_timeout_ms == 0 {
            problems.push("workflow.step_timeout_ms must be greater than 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid { problems })
        }
    }
}
