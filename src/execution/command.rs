//! Command and result types for remote execution.
//!
//! A [`Command`] is one opaque, named remote operation. The engine never
//! interprets `operation` or `params`; it only moves them across the wire and
//! folds the reply into a [`CommandResult`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::constants::defaults;
use crate::utils::serde::deserialize_optional_millis;

/// One issued remote operation
///
/// # Examples
///
/// ```rust
/// use cmdflow_core::execution::command::Command;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let command = Command::new("create_widget_blueprint", json!({"name": "MainMenu"}))
///     .with_timeout(Duration::from_secs(5))
///     .with_max_retries(1);
///
/// assert_eq!(command.operation, "create_widget_blueprint");
/// assert_eq!(command.retry_count, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Unique identifier for this issuance
    pub id: String,

    /// Remote operation name, sent as the envelope `type`
    pub operation: String,

    /// Operation-specific parameters, sent as the envelope `params`
    pub params: Map<String, Value>,

    /// Bound on a single request/response round trip
    pub timeout: Duration,

    /// Retries allowed after the first attempt
    pub max_retries: u32,

    /// Retries consumed so far
    pub retry_count: u32,
}

impl Command {
    /// Create a command with a generated id and default timeout/retry budget.
    ///
    /// Non-object `params` are wrapped as `{"value": params}`; `null` becomes
    /// an empty map.
    pub fn new(operation: impl Into<String>, params: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            params: params_to_map(params),
            timeout: Duration::from_millis(defaults::COMMAND_TIMEOUT_MS),
            max_retries: defaults::MAX_RETRIES,
            retry_count: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Total attempts the executor may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

fn params_to_map(params: Value) -> Map<String, Value> {
    match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Caller-facing command description, as accepted by batch front ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(alias = "command_type", alias = "type")]
    pub operation: String,

    #[serde(default)]
    pub params: Value,

    #[serde(default, deserialize_with = "deserialize_optional_millis")]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl CommandSpec {
    pub fn new(operation: impl Into<String>, params: Value) -> Self {
        Self {
            operation: operation.into(),
            params,
            timeout_ms: None,
            max_retries: None,
        }
    }

    /// Materialize a command, filling unset fields from the engine defaults
    pub fn into_command(self, default_timeout: Duration, default_retries: u32) -> Command {
        Command::new(self.operation, self.params)
            .with_timeout(
                self.timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_timeout),
            )
            .with_max_retries(self.max_retries.unwrap_or(default_retries))
    }
}

/// Failure classification carried by a failed [`CommandResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    /// Connect refused/timed out, socket failure
    Transport,
    /// Empty, truncated or unparseable reply
    Protocol,
    /// Well-formed reply reporting failure
    Application,
    /// No complete reply within the command timeout
    Timeout,
    /// No connection could be leased
    ResourceUnavailable,
    /// The executing task itself faulted
    Fault,
}

/// Structured outcome of executing one [`Command`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Always equal to the originating command's id
    pub command_id: String,
    pub success: bool,
    /// Present iff `success`
    pub data: Option<Value>,
    /// Present iff not `success`
    pub error: Option<String>,
    pub error_kind: Option<CommandErrorKind>,
    pub execution_time: Duration,
    pub retry_count: u32,
}

impl CommandResult {
    pub fn success(command_id: impl Into<String>, data: Value, execution_time: Duration, retry_count: u32) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            execution_time,
            retry_count,
        }
    }

    pub fn failure(
        command_id: impl Into<String>,
        kind: CommandErrorKind,
        error: impl Into<String>,
        execution_time: Duration,
        retry_count: u32,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            execution_time,
            retry_count,
        }
    }

    /// Result synthesized for a command whose execution task faulted
    pub fn fault(command_id: impl Into<String>, fault: impl Into<String>) -> Self {
        Self::failure(command_id, CommandErrorKind::Fault, fault, Duration::ZERO, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_command_defaults() {
        let command = Command::new("get_actors", json!({"level": "Main"}));
        assert!(Uuid::parse_str(&command.id).is_ok());
        assert_eq!(command.max_retries, defaults::MAX_RETRIES);
        assert_eq!(command.max_attempts(), defaults::MAX_RETRIES + 1);
        assert_eq!(command.params["level"], "Main");
    }

    #[test]
    fn test_non_object_params_are_wrapped() {
        assert!(Command::new("ping", Value::Null).params.is_empty());
        let command = Command::new("echo", json!([1, 2]));
        assert_eq!(command.params["value"], json!([1, 2]));
    }

    #[test]
    fn test_command_spec_accepts_legacy_field_names() {
        let spec: CommandSpec = serde_json::from_value(json!({
            "command_type": "compile_blueprint",
            "params": {"path": "/Game/UI/Menu"},
            "timeout_ms": "2500"
        }))
        .unwrap();

        let command = spec.into_command(Duration::from_secs(30), 3);
        assert_eq!(command.operation, "compile_blueprint");
        assert_eq!(command.timeout, Duration::from_millis(2500));
        assert_eq!(command.max_retries, 3);
    }

    #[test]
    fn test_result_constructors_keep_payload_exclusive() {
        let ok = CommandResult::success("a", json!({"done": true}), Duration::from_millis(4), 0);
        assert!(ok.data.is_some() && ok.error.is_none());

        let fault = CommandResult::fault("b", "task panicked");
        assert!(!fault.success);
        assert!(fault.data.is_none());
        assert_eq!(fault.error_kind, Some(CommandErrorKind::Fault));
        assert_eq!(fault.execution_time, Duration::ZERO);
    }
}
