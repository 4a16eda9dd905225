//! Step bookkeeping and checkpoints for one workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use super::types::{StateMap, StepReport, WorkflowProgress};
use crate::constants::state_keys;
use crate::state_machine::{StepEvent, StepStatus, TransitionError, WorkflowStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub collaborator: String,
    /// Snapshot of the cumulative state the step started with
    pub input: Option<StateMap>,
    /// Null until the step completes
    pub output: Option<StateMap>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, collaborator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collaborator: collaborator.into(),
            input: None,
            output: None,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn report(&self) -> StepReport {
        let duration_ms = match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        };
        StepReport {
            name: self.name.clone(),
            collaborator: self.collaborator.clone(),
            status: self.status,
            output: self.output.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms,
        }
    }
}

/// Snapshot taken right after a step completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub step_index: usize,
    pub state: StateMap,
    pub completed_steps: BTreeSet<usize>,
}

/// Authoritative bookkeeping of one run, mutated only by the orchestrator
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub steps: Vec<WorkflowStep>,
    pub current_step: usize,
    pub shared: StateMap,
    pub checkpoints: Vec<Checkpoint>,
    pub status: WorkflowStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub failed_step: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(workflow_id: Uuid, request: Value, context: Value, steps: Vec<WorkflowStep>) -> Self {
        let mut shared = StateMap::new();
        shared.insert(state_keys::REQUEST.to_string(), request);
        shared.insert(state_keys::CONTEXT.to_string(), context);
        shared.insert(
            state_keys::WORKFLOW_ID.to_string(),
            Value::String(workflow_id.to_string()),
        );

        Self {
            workflow_id,
            steps,
            current_step: 0,
            shared,
            checkpoints: Vec::new(),
            status: WorkflowStatus::Running,
            errors: Vec::new(),
            warnings: Vec::new(),
            failed_step: None,
            started_at: Utc::now(),
        }
    }

    /// Mark a step running and return a copy of its input
    pub fn start_step(&mut self, index: usize) -> Result<StateMap, TransitionError> {
        let input = self.shared.clone();
        let step = self.step_mut(index)?;
        step.status = step.status.apply(&StepEvent::Start)?;
        step.started_at = Some(Utc::now());
        step.input = Some(input.clone());
        self.current_step = index;
        Ok(input)
    }

    /// Merge the output, mark the step completed and take a checkpoint
    pub fn complete_step(&mut self, index: usize, output: StateMap) -> Result<(), TransitionError> {
        let step = self.step_mut(index)?;
        step.status = step.status.apply(&StepEvent::Complete)?;
        step.completed_at = Some(Utc::now());
        step.output = Some(output.clone());

        self.shared.extend(output);
        self.create_checkpoint();
        Ok(())
    }

    /// Mark a step failed; a step that already failed keeps its first error
    pub fn fail_step(&mut self, index: usize, error: impl Into<String>) -> bool {
        let Ok(step) = self.step_mut(index) else {
            return false;
        };
        let error = error.into();
        match step.status.apply(&StepEvent::Fail(error.clone())) {
            Ok(status) => {
                step.status = status;
                step.error = Some(error);
                step.completed_at = Some(Utc::now());
                true
            }
            Err(_) => false,
        }
    }

    /// Whether the run's result is already decided: a step failed or every
    /// step completed
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
            || self.failed_step.is_some()
            || self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    /// Index of the step currently running, if any
    pub fn running_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status.is_active())
    }

    pub fn create_checkpoint(&mut self) {
        let completed_steps = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.status == StepStatus::Completed)
            .map(|(index, _)| index)
            .collect();

        self.checkpoints.push(Checkpoint {
            timestamp: Utc::now(),
            step_index: self.current_step,
            state: self.shared.clone(),
            completed_steps,
        });
    }

    /// Restore the most recent checkpoint; steps outside its completed set
    /// return to pending. Returns false when no checkpoint exists.
    pub fn rollback_to_checkpoint(&mut self) -> bool {
        let Some(checkpoint) = self.checkpoints.last().cloned() else {
            return false;
        };

        self.current_step = checkpoint.step_index;
        self.shared = checkpoint.state;
        for (index, step) in self.steps.iter_mut().enumerate() {
            if !checkpoint.completed_steps.contains(&index) {
                step.status = StepStatus::Pending;
                step.output = None;
                step.started_at = None;
                step.completed_at = None;
                step.error = None;
            }
        }
        true
    }

    pub fn progress(&self) -> WorkflowProgress {
        let total_steps = self.steps.len();
        let completed_steps = self.count(StepStatus::Completed);
        let failed_steps = self.count(StepStatus::Failed);

        WorkflowProgress {
            workflow_id: self.workflow_id,
            total_steps,
            completed_steps,
            failed_steps,
            current_step: self.current_step,
            current_step_name: self.steps.get(self.current_step).map(|s| s.name.clone()),
            progress_percentage: if total_steps == 0 {
                0.0
            } else {
                completed_steps as f64 / total_steps as f64 * 100.0
            },
            status: self.status,
        }
    }

    pub fn step_reports(&self) -> Vec<StepReport> {
        self.steps.iter().map(WorkflowStep::report).collect()
    }

    /// Step outputs merged in declared order
    pub fn merged_outputs(&self) -> StateMap {
        let mut merged = StateMap::new();
        for output in self.steps.iter().filter_map(|s| s.output.as_ref()) {
            merged.extend(output.clone());
        }
        merged
    }

    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    fn step_mut(&mut self, index: usize) -> Result<&mut WorkflowStep, TransitionError> {
        let len = self.steps.len();
        self.steps
            .get_mut(index)
            .ok_or_else(|| TransitionError::new("step", format!("index {index} of {len}"), "lookup"))
    }
}
