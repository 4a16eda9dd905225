//! # Structured Logging Module
//!
//! Environment-aware structured logging for the command engine and the
//! workflow orchestrator. Console output is either human readable or JSON.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::constants::env_vars;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = resolve_filter(config, &environment);

        let console = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(filter.clone()))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(filter.clone()))
                .boxed()
        };

        // An embedding application may already own the global subscriber
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            filter = %filter,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(env_vars::ENVIRONMENT)
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn resolve_filter(config: &LoggingConfig, environment: &str) -> String {
    if let Some(level) = &config.level {
        return level.clone();
    }
    std::env::var(env_vars::LOG_FILTER)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| get_log_level(environment))
}

/// Log structured data for command operations
pub fn log_command_operation(
    operation: &str,
    command_id: &str,
    remote_operation: &str,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        command_id = %command_id,
        remote_operation = %remote_operation,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📡 COMMAND_OPERATION"
    );
}

/// Log structured data for transaction operations
pub fn log_transaction_operation(
    operation: &str,
    transaction_id: &str,
    status: &str,
    command_count: usize,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        transaction_id = %transaction_id,
        status = %status,
        command_count = command_count,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔁 TRANSACTION_OPERATION"
    );
}

/// Log structured data for workflow step operations
pub fn log_step_operation(
    operation: &str,
    workflow_id: &str,
    step_index: usize,
    step_name: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        workflow_id = %workflow_id,
        step_index = step_index,
        step_name = %step_name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
