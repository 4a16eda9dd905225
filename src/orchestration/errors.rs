//! # Orchestration Errors
//!
//! Failures raised while defining or running a workflow.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Unknown workflow run: {0}")]
    UnknownRun(Uuid),

    #[error("Workflow definition '{0}' has no steps")]
    EmptyDefinition(String),

    #[error("Workflow definition declares step '{0}' more than once")]
    DuplicateStep(String),

    #[error("Step '{step}' is missing required input '{key}'")]
    MissingInput { step: String, key: String },

    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("Step '{step}' raised a fault: {message}")]
    StepFault { step: String, message: String },

    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },
}

impl WorkflowError {
    /// Name of the step the error belongs to, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::MissingInput { step, .. }
            | Self::StepTimeout { step, .. }
            | Self::StepFault { step, .. }
            | Self::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
