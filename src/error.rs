//! Error types for the Cmdflow engine.
//!
//! Each component owns a narrow error enum next to its code; this module
//! aggregates them into [`CmdflowError`] for callers that cross component
//! boundaries.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::execution::connection_pool::PoolError;
use crate::orchestration::errors::WorkflowError;
use crate::transaction::TransactionError;

#[derive(Debug, Error)]
pub enum CmdflowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("Command queue is closed")]
    QueueClosed,
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for CmdflowError {
    fn from(error: serde_json::Error) -> Self {
        CmdflowError::InvalidInput(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, CmdflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_component() {
        let err = CmdflowError::from(TransactionError::Busy {
            active: "tx-1".to_string(),
        });
        assert!(err.to_string().starts_with("Transaction error:"));
        assert!(err.to_string().contains("tx-1"));
    }

    #[test]
    fn test_json_error_maps_to_invalid_input() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = CmdflowError::from(parse_err);
        assert!(matches!(err, CmdflowError::InvalidInput(_)));
    }
}
