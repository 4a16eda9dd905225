//! # Batch Executor
//!
//! Runs a list of commands either in order or concurrently. Both modes return
//! one result per input command, in input order.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::command::{Command, CommandResult};
use super::executor::CommandExecutor;
use crate::transaction::TransactionSlot;
use crate::utils::panic::join_error_message;

/// What a sequential batch does after a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep going to report as much as possible
    ContinueOnFailure,
    /// Do not start any command after the first failure
    StopOnFailure,
}

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    executor: Arc<CommandExecutor>,
    transaction_slot: TransactionSlot,
}

impl BatchExecutor {
    pub fn new(executor: Arc<CommandExecutor>, transaction_slot: TransactionSlot) -> Self {
        Self {
            executor,
            transaction_slot,
        }
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    /// Execute in order; stops early only while a transaction is active
    pub async fn execute_sequential(&self, commands: Vec<Command>) -> Vec<CommandResult> {
        let policy = if self.transaction_slot.is_active() {
            FailurePolicy::StopOnFailure
        } else {
            FailurePolicy::ContinueOnFailure
        };
        self.execute_sequential_with_policy(commands, policy).await
    }

    #[instrument(skip(self, commands), fields(batch_size = commands.len()))]
    pub async fn execute_sequential_with_policy(
        &self,
        commands: Vec<Command>,
        policy: FailurePolicy,
    ) -> Vec<CommandResult> {
        let total = commands.len();
        let mut results = Vec::with_capacity(total);

        for command in commands {
            let result = self.executor.execute(command).await;
            let failed = !result.success;
            results.push(result);

            if failed && policy == FailurePolicy::StopOnFailure {
                warn!(
                    executed = results.len(),
                    skipped = total - results.len(),
                    "Sequential batch stopped at first failure"
                );
                break;
            }
        }

        debug!(executed = results.len(), total, "Sequential batch finished");
        results
    }

    /// Execute every command concurrently and collect all results.
    ///
    /// A command whose task faults yields a failed result carrying the fault
    /// text; sibling commands are unaffected.
    #[instrument(skip(self, commands), fields(batch_size = commands.len()))]
    pub async fn execute_parallel(&self, commands: Vec<Command>) -> Vec<CommandResult> {
        let mut ids = Vec::with_capacity(commands.len());
        let mut handles = Vec::with_capacity(commands.len());

        for command in commands {
            ids.push(command.id.clone());
            let executor = self.executor.clone();
            handles.push(tokio::spawn(async move { executor.execute(command).await }));
        }

        let joined = join_all(handles).await;
        let results: Vec<CommandResult> = joined
            .into_iter()
            .zip(ids)
            .map(|(outcome, command_id)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    let fault = join_error_message(e);
                    warn!(command_id = %command_id, fault = %fault, "Parallel command faulted");
                    CommandResult::fault(command_id, fault)
                }
            })
            .collect();

        info!(
            total = results.len(),
            failed = results.iter().filter(|r| !r.success).count(),
            "Parallel batch finished"
        );
        results
    }
}
