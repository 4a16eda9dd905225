//! # Workflow Orchestration
//!
//! Sequences named steps over a cumulative state, each step delegated to an
//! external collaborator through [`StepRunner`].
//!
//! ## Core Components
//!
//! - **WorkflowOrchestrator**: registers runs, drives them step by step and
//!   answers progress, cancellation and outcome queries
//! - **WorkflowState**: per-run step bookkeeping and checkpoints
//! - **Stages**: ready-made collaborators backed by closures, remote commands
//!   or transactions
//!
//! ## Failure Handling
//!
//! A failed, faulted or timed-out step ends the run after one rollback to the
//! most recent checkpoint. The step is not retried. Errors and warnings are
//! reported separately in the [`WorkflowOutcome`].

pub mod errors;
pub mod orchestrator;
pub mod stages;
pub mod types;
pub mod workflow_state;

pub use errors::WorkflowError;
pub use orchestrator::WorkflowOrchestrator;
pub use stages::{CommandStep, FnStep, TransactionStep};
pub use types::{
    StateMap, StepDefinition, StepInput, StepOutcome, StepReport, StepRunner, WorkflowDefinition,
    WorkflowOutcome, WorkflowProgress,
};
pub use workflow_state::{Checkpoint, WorkflowState, WorkflowStep};
