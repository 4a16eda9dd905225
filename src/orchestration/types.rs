//! # Orchestration Types
//!
//! The collaborator contract and the records a workflow run produces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::WorkflowError;
use crate::state_machine::{StepStatus, WorkflowStatus};

/// Cumulative workflow state: the request plus every completed step's output
pub type StateMap = Map<String, Value>;

/// Input handed to one step invocation
#[derive(Debug, Clone)]
pub struct StepInput {
    pub workflow_id: Uuid,
    pub step_index: usize,
    pub step_name: String,
    /// Deep copy of the cumulative state; mutations are not seen by the run
    pub state: StateMap,
}

impl StepInput {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }
}

/// What a collaborator reports back for one step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Merged into the cumulative state on success
    pub output: StateMap,
    pub success: bool,
    pub error: Option<String>,
    /// Non-fatal advisories
    pub warnings: Vec<String>,
}

impl StepOutcome {
    pub fn success(output: StateMap) -> Self {
        Self {
            output,
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// External collaborator that implements one workflow step
///
/// The orchestrator owns all step bookkeeping; a runner only turns the
/// cumulative state into an output. Long-running runners should observe the
/// cancellation token between units of work.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Identifier recorded as the step's collaborator
    fn collaborator_id(&self) -> &str;

    /// State keys that must exist before the step may run
    fn required_inputs(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run_step(&self, input: StepInput, cancel: CancellationToken) -> StepOutcome;
}

/// One declared step of a workflow
#[derive(Clone)]
pub struct StepDefinition {
    pub name: String,
    pub runner: Arc<dyn StepRunner>,
    /// Overrides the configured per-step timeout
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("collaborator", &self.runner.collaborator_id())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Fixed, ordered list of steps
///
/// # Examples
///
/// ```rust
/// use cmdflow_core::orchestration::{FnStep, StepOutcome, WorkflowDefinition};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let parse = Arc::new(FnStep::new("ui_parser", |_input, _cancel| async move {
///     let mut output = serde_json::Map::new();
///     output.insert("ui_specification".to_string(), json!({"widgets": []}));
///     StepOutcome::success(output)
/// }));
///
/// let definition = WorkflowDefinition::new("umg_generation").with_step("parse_requirements", parse);
/// assert_eq!(definition.steps().len(), 1);
/// assert!(definition.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, name: impl Into<String>, runner: Arc<dyn StepRunner>) -> Self {
        self.steps.push(StepDefinition {
            name: name.into(),
            runner,
            timeout: None,
        });
        self
    }

    pub fn with_step_timeout(
        mut self,
        name: impl Into<String>,
        runner: Arc<dyn StepRunner>,
        timeout: Duration,
    ) -> Self {
        self.steps.push(StepDefinition {
            name: name.into(),
            runner,
            timeout: Some(timeout),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::EmptyDefinition(self.name.clone()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if self.steps[..index].iter().any(|s| s.name == step.name) {
                return Err(WorkflowError::DuplicateStep(step.name.clone()));
            }
        }
        Ok(())
    }
}

/// Per-step entry of a [`WorkflowOutcome`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub collaborator: String,
    pub status: StepStatus,
    pub output: Option<StateMap>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Structured result of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    /// Cumulative state; partial when the run did not succeed
    pub state: StateMap,
    pub steps: Vec<StepReport>,
    /// Every error of the run, in order
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub failed_step: Option<String>,
    pub final_report: Option<Value>,
    pub execution_time: Duration,
}

impl WorkflowOutcome {
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Success
    }
}

/// Live progress of a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub workflow_id: Uuid,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub current_step: usize,
    pub current_step_name: Option<String>,
    pub progress_percentage: f64,
    pub status: WorkflowStatus,
}
