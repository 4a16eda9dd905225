//! # System Constants
//!
//! Defaults and well-known names that define the operational boundaries of
//! the command engine.

/// Compiled-in configuration defaults
pub mod defaults {
    pub const REMOTE_HOST: &str = "127.0.0.1";
    pub const REMOTE_PORT: u16 = 55557;
    pub const MAX_CONNECTIONS: usize = 5;
    pub const CONNECTION_TIMEOUT_MS: u64 = 10_000;
    pub const COMMAND_TIMEOUT_MS: u64 = 30_000;
    pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;
    pub const MAX_RETRIES: u32 = 3;
    pub const MAX_RETRIES_CEILING: u32 = 20;
    pub const BACKOFF_BASE_MS: u64 = 1_000;
    pub const STEP_TIMEOUT_MS: u64 = 300_000;
    /// Read buffer for a single socket read
    pub const READ_CHUNK_BYTES: usize = 8_192;
}

/// Environment variable names
pub mod env_vars {
    pub const ENVIRONMENT: &str = "CMDFLOW_ENV";
    pub const CONFIG_DIR: &str = "CMDFLOW_CONFIG_DIR";
    pub const LOG_FILTER: &str = "CMDFLOW_LOG";
    /// Prefix for layered configuration overrides, e.g. `CMDFLOW_REMOTE__PORT`
    pub const CONFIG_PREFIX: &str = "CMDFLOW";
}

/// Keys the orchestrator places in the cumulative workflow state
pub mod state_keys {
    pub const REQUEST: &str = "request";
    pub const CONTEXT: &str = "context";
    pub const WORKFLOW_ID: &str = "workflow_id";
    pub const FINAL_REPORT: &str = "final_report";
}

/// Well-known error texts surfaced to callers
pub mod messages {
    pub const WORKFLOW_CANCELLED: &str = "Workflow cancelled by user";
    pub const UNKNOWN_REMOTE_ERROR: &str = "Unknown remote error";
}
