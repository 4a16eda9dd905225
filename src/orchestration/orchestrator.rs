//! # Workflow Orchestrator
//!
//! Runs a fixed, ordered list of steps, each delegated to a [`StepRunner`].
//! Every step runs under a wall-clock timeout; a successful step is merged
//! into the cumulative state and checkpointed. The first failure triggers one
//! checkpoint rollback and ends the run. Cancellation is cooperative and is
//! observed at step boundaries.
//!
//! [`StepRunner`]: super::types::StepRunner

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::errors::WorkflowError;
use super::types::{
    StepDefinition, StepInput, StepOutcome, WorkflowDefinition, WorkflowOutcome, WorkflowProgress,
};
use super::workflow_state::{WorkflowState, WorkflowStep};
use crate::config::WorkflowConfig;
use crate::constants::{messages, state_keys};
use crate::logging::log_step_operation;
use crate::state_machine::{StepStatus, WorkflowStatus};
use crate::utils::panic::join_error_message;

/// One registered workflow run
struct WorkflowRun {
    state: RwLock<WorkflowState>,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<Arc<WorkflowOutcome>>>,
}

impl WorkflowRun {
    fn new(workflow_id: Uuid, definition: &WorkflowDefinition, request: Value, context: Value) -> Self {
        let steps = definition
            .steps()
            .iter()
            .map(|s| WorkflowStep::new(&s.name, s.runner.collaborator_id()))
            .collect();
        let (outcome, _) = watch::channel(None);
        Self {
            state: RwLock::new(WorkflowState::new(workflow_id, request, context, steps)),
            cancel: CancellationToken::new(),
            outcome,
        }
    }
}

/// Supervises workflow runs for one engine instance
pub struct WorkflowOrchestrator {
    config: WorkflowConfig,
    runs: DashMap<Uuid, Arc<WorkflowRun>>,
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("config", &self.config)
            .field("runs", &self.runs.len())
            .finish()
    }
}

impl WorkflowOrchestrator {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            runs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Register a run and drive it in the background; returns its id
    pub fn start_workflow(
        &self,
        definition: Arc<WorkflowDefinition>,
        request: Value,
        context: Value,
    ) -> Result<Uuid, WorkflowError> {
        definition.validate()?;
        let (workflow_id, run) = self.register(&definition, request, context);
        let config = self.config.clone();
        tokio::spawn(async move {
            drive(workflow_id, run, definition, config).await;
        });
        Ok(workflow_id)
    }

    /// Run a workflow to completion on the calling task
    pub async fn execute_workflow(
        &self,
        definition: Arc<WorkflowDefinition>,
        request: Value,
        context: Value,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        definition.validate()?;
        let (workflow_id, run) = self.register(&definition, request, context);
        let outcome = drive(workflow_id, run, definition, self.config.clone()).await;
        Ok(outcome.as_ref().clone())
    }

    pub fn get_progress(&self, workflow_id: Uuid) -> Result<WorkflowProgress, WorkflowError> {
        let run = self.run(workflow_id)?;
        let progress = run.state.read().progress();
        Ok(progress)
    }

    /// Request cancellation.
    ///
    /// The running step is marked failed immediately; work already handed to
    /// its collaborator is not interrupted. Returns false for unknown runs
    /// and runs whose result is already decided.
    pub fn cancel(&self, workflow_id: Uuid) -> bool {
        let Ok(run) = self.run(workflow_id) else {
            return false;
        };

        {
            let mut state = run.state.write();
            if state.is_settled() {
                return false;
            }
            if let Some(index) = state.running_step() {
                state.fail_step(index, messages::WORKFLOW_CANCELLED);
            }
            state.errors.push(messages::WORKFLOW_CANCELLED.to_string());
            // Cancelled under the state lock so the driver sees it at its next step boundary
            run.cancel.cancel();
        }

        info!(workflow_id = %workflow_id, "Workflow cancellation requested");
        true
    }

    /// Wait for a run to finish and return its outcome
    pub async fn wait_for_outcome(&self, workflow_id: Uuid) -> Result<WorkflowOutcome, WorkflowError> {
        let run = self.run(workflow_id)?;
        let mut receiver = run.outcome.subscribe();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome
            .map(|o| o.as_ref().clone())
            .ok_or(WorkflowError::UnknownRun(workflow_id))
    }

    /// Outcome of a finished run, if available
    pub fn outcome(&self, workflow_id: Uuid) -> Option<WorkflowOutcome> {
        let run = self.runs.get(&workflow_id)?;
        let outcome = run.outcome.borrow().clone();
        outcome.map(|o| o.as_ref().clone())
    }

    /// Forget finished runs; returns how many were removed
    pub fn prune_finished(&self) -> usize {
        let before = self.runs.len();
        self.runs.retain(|_, run| run.outcome.borrow().is_none());
        before - self.runs.len()
    }

    fn register(
        &self,
        definition: &WorkflowDefinition,
        request: Value,
        context: Value,
    ) -> (Uuid, Arc<WorkflowRun>) {
        let workflow_id = Uuid::new_v4();
        let run = Arc::new(WorkflowRun::new(workflow_id, definition, request, context));
        self.runs.insert(workflow_id, run.clone());
        info!(workflow_id = %workflow_id, workflow = %definition.name(), steps = definition.steps().len(), "Workflow registered");
        (workflow_id, run)
    }

    fn run(&self, workflow_id: Uuid) -> Result<Arc<WorkflowRun>, WorkflowError> {
        self.runs
            .get(&workflow_id)
            .map(|entry| entry.value().clone())
            .ok_or(WorkflowError::UnknownRun(workflow_id))
    }
}

#[instrument(skip(run, definition, config), fields(workflow = %definition.name()))]
async fn drive(
    workflow_id: Uuid,
    run: Arc<WorkflowRun>,
    definition: Arc<WorkflowDefinition>,
    config: WorkflowConfig,
) -> Arc<WorkflowOutcome> {
    let started = Instant::now();
    let workflow_key = workflow_id.to_string();

    for (index, step) in definition.steps().iter().enumerate() {
        let input = {
            let mut state = run.state.write();
            if run.cancel.is_cancelled() {
                break;
            }
            match state.start_step(index) {
                Ok(input) => input,
                Err(e) => {
                    warn!(error = %e, "Step could not be started");
                    break;
                }
            }
        };
        log_step_operation("start", &workflow_key, index, &step.name, "running", None);

        let result = run_step(workflow_id, index, step, input, &run.cancel, &config).await;

        let mut state = run.state.write();
        // Anything reported after a cancel request is discarded
        if run.cancel.is_cancelled() {
            drop(state);
            log_step_operation("finish", &workflow_key, index, &step.name, "cancelled", None);
            break;
        }
        match result {
            Ok(outcome) if outcome.success => {
                state.warnings.extend(outcome.warnings);
                if let Err(e) = state.complete_step(index, outcome.output) {
                    warn!(error = %e, "Step completion rejected");
                    break;
                }
                log_step_operation("finish", &workflow_key, index, &step.name, "completed", None);
            }
            failed => {
                let error = match failed {
                    Ok(outcome) => {
                        state.warnings.extend(outcome.warnings);
                        WorkflowError::StepFailed {
                            step: step.name.clone(),
                            message: outcome
                                .error
                                .unwrap_or_else(|| "step reported failure without an error".to_string()),
                        }
                    }
                    Err(e) => e,
                };
                let message = error.to_string();
                state.fail_step(index, message.clone());
                state.errors.push(message.clone());
                state.failed_step = Some(step.name.clone());
                log_step_operation("finish", &workflow_key, index, &step.name, "failed", Some(&message));

                if config.enable_rollback {
                    // One rollback attempt; the step is not retried afterwards
                    if state.rollback_to_checkpoint() {
                        info!(step = %step.name, "Rolled back to last checkpoint");
                    } else {
                        info!(step = %step.name, "No checkpoint to roll back to");
                    }
                }
                break;
            }
        }
    }

    let outcome = {
        let mut state = run.state.write();
        let all_completed = state
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Completed);

        state.status = if all_completed && state.failed_step.is_none() {
            WorkflowStatus::Success
        } else if run.cancel.is_cancelled() {
            WorkflowStatus::Cancelled
        } else {
            WorkflowStatus::Failed
        };

        let final_report = if state.status == WorkflowStatus::Success {
            let report = json!({
                "workflow_id": workflow_key,
                "request": state.shared.get(state_keys::REQUEST).cloned().unwrap_or(Value::Null),
                "status": "completed",
                "completed_at": Utc::now().to_rfc3339(),
                "steps": definition.steps().iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
                "outputs": Value::Object(state.merged_outputs()),
            });
            state
                .shared
                .insert(state_keys::FINAL_REPORT.to_string(), report.clone());
            Some(report)
        } else {
            None
        };

        Arc::new(WorkflowOutcome {
            workflow_id,
            status: state.status,
            state: state.shared.clone(),
            steps: state.step_reports(),
            errors: state.errors.clone(),
            warnings: state.warnings.clone(),
            failed_step: state.failed_step.clone(),
            final_report,
            execution_time: started.elapsed(),
        })
    };

    info!(
        status = %outcome.status,
        errors = outcome.errors.len(),
        elapsed_ms = outcome.execution_time.as_millis() as u64,
        "Workflow finished"
    );
    run.outcome.send_replace(Some(outcome.clone()));
    outcome
}

/// Invoke one collaborator under the step timeout
async fn run_step(
    workflow_id: Uuid,
    index: usize,
    step: &StepDefinition,
    input: serde_json::Map<String, Value>,
    cancel: &CancellationToken,
    config: &WorkflowConfig,
) -> Result<StepOutcome, WorkflowError> {
    if let Some(key) = step
        .runner
        .required_inputs()
        .into_iter()
        .find(|key| !input.contains_key(key))
    {
        return Err(WorkflowError::MissingInput {
            step: step.name.clone(),
            key,
        });
    }

    let timeout = step.timeout.unwrap_or_else(|| config.step_timeout());
    let step_token = cancel.child_token();
    let runner = step.runner.clone();
    let step_input = StepInput {
        workflow_id,
        step_index: index,
        step_name: step.name.clone(),
        state: input,
    };

    let task_token = step_token.clone();
    let mut handle = tokio::spawn(async move { runner.run_step(step_input, task_token).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(join_error)) => Err(WorkflowError::StepFault {
            step: step.name.clone(),
            message: join_error_message(join_error),
        }),
        Err(_) => {
            // Signal the collaborator and leave the task detached
            step_token.cancel();
            Err(WorkflowError::StepTimeout {
                step: step.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}
