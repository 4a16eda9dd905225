//! Transaction lifecycle: begin, add, commit with compensation, rollback.

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    CompensationReport, Transaction, TransactionError, TransactionOutcome, TransactionSlot,
    TransactionStatusReport,
};
use crate::config::CompensationScope;
use crate::execution::batch::{BatchExecutor, FailurePolicy};
use crate::execution::command::{Command, CommandResult};
use crate::logging::log_transaction_operation;
use crate::state_machine::{TransactionEvent, TransactionStatus};
use crate::stats::StatsCollector;
use crate::utils::panic::{join_error_message, panic_message};

pub struct TransactionManager {
    batch: BatchExecutor,
    slot: TransactionSlot,
    active: Mutex<Option<Transaction>>,
    history: DashMap<String, Transaction>,
    scope: CompensationScope,
    stats: Arc<StatsCollector>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.slot.current())
            .field("finished", &self.history.len())
            .field("scope", &self.scope)
            .finish()
    }
}

impl TransactionManager {
    pub fn new(
        batch: BatchExecutor,
        slot: TransactionSlot,
        scope: CompensationScope,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            batch,
            slot,
            active: Mutex::new(None),
            history: DashMap::new(),
            scope,
            stats,
        }
    }

    /// Id of the active transaction, if any
    pub fn active(&self) -> Option<String> {
        self.slot.current()
    }

    /// Start a new transaction; fails if another is active
    pub fn begin(&self) -> Result<String, TransactionError> {
        let transaction_id = Uuid::new_v4().to_string();
        self.slot
            .try_claim(&transaction_id)
            .map_err(|active| TransactionError::Busy { active })?;

        *self.active.lock() = Some(Transaction::new(&transaction_id));
        log_transaction_operation("begin", &transaction_id, "pending", 0, None);
        Ok(transaction_id)
    }

    /// Append a forward command and its optional compensation
    pub fn add_command(
        &self,
        command: Command,
        compensation: Option<Command>,
    ) -> Result<(), TransactionError> {
        let mut active = self.active.lock();
        let transaction = active
            .as_mut()
            .ok_or(TransactionError::NoActiveTransaction)?;

        if transaction.status != TransactionStatus::Pending {
            return Err(TransactionError::AlreadyCommitting {
                transaction_id: transaction.id.clone(),
            });
        }

        transaction.commands.push(command);
        transaction.compensations.push(compensation);
        Ok(())
    }

    /// Run the group in order, stopping at the first failure.
    ///
    /// A failure runs compensations in reverse order; the transaction ends
    /// `failed` whether or not compensation fully succeeds. The commit runs
    /// on its own task, so dropping the returned future does not stop it
    /// from finishing and freeing the slot.
    #[instrument(skip(self))]
    pub async fn commit(self: &Arc<Self>) -> Result<TransactionOutcome, TransactionError> {
        let (transaction_id, commands, compensations) = {
            let mut active = self.active.lock();
            let transaction = active
                .as_mut()
                .ok_or(TransactionError::NoActiveTransaction)?;
            if transaction.status == TransactionStatus::Running {
                return Err(TransactionError::CommitInProgress {
                    transaction_id: transaction.id.clone(),
                });
            }
            transaction.status = transaction.status.apply(&TransactionEvent::StartCommit)?;
            (
                transaction.id.clone(),
                transaction.commands.clone(),
                transaction.compensations.clone(),
            )
        };

        log_transaction_operation("commit", &transaction_id, "running", commands.len(), None);

        let manager = Arc::clone(self);
        let task_id = transaction_id.clone();
        let handle = tokio::spawn(async move {
            manager.run_commit(task_id, commands, compensations).await
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                let fault = format!("Commit faulted: {}", join_error_message(e));
                error!(transaction_id = %transaction_id, fault = %fault, "Transaction commit task failed");
                let status = self.finish(
                    &transaction_id,
                    &TransactionEvent::Fail(fault.clone()),
                    Vec::new(),
                )?;
                Ok(TransactionOutcome {
                    transaction_id,
                    status,
                    results: Vec::new(),
                    compensation: None,
                    error: Some(fault),
                })
            }
        }
    }

    async fn run_commit(
        &self,
        transaction_id: String,
        commands: Vec<Command>,
        compensations: Vec<Option<Command>>,
    ) -> Result<TransactionOutcome, TransactionError> {
        let command_count = commands.len();
        let run = AssertUnwindSafe(
            self.batch
                .execute_sequential_with_policy(commands, FailurePolicy::StopOnFailure),
        )
        .catch_unwind()
        .await;

        let (results, to_compensate, failure) = match run {
            Ok(results) => {
                let first_failure = results.iter().find(|r| !r.success).map(|r| {
                    format!(
                        "Command {} failed: {}",
                        r.command_id,
                        r.error.as_deref().unwrap_or("unknown error")
                    )
                });
                let failure = match first_failure {
                    Some(message) => Some(message),
                    None if results.len() < command_count => {
                        Some("Commit stopped before every command ran".to_string())
                    }
                    None => None,
                };
                let to_compensate = match failure {
                    Some(_) => self.select_compensations(&results, &compensations),
                    None => Vec::new(),
                };
                (results, to_compensate, failure)
            }
            Err(payload) => {
                let fault = format!("Commit faulted: {}", panic_message(payload.as_ref()));
                error!(transaction_id = %transaction_id, fault = %fault, "Transaction commit faulted");
                // Progress is unknown, so compensate everything registered
                let to_compensate = compensations.iter().rev().flatten().cloned().collect();
                (Vec::new(), to_compensate, Some(fault))
            }
        };

        let compensation = match &failure {
            Some(_) => Some(self.compensate(&transaction_id, to_compensate).await),
            None => None,
        };

        let event = match &failure {
            Some(message) => TransactionEvent::Fail(message.clone()),
            None => TransactionEvent::Complete,
        };
        let status = self.finish(&transaction_id, &event, results.clone())?;

        log_transaction_operation(
            "commit",
            &transaction_id,
            &status.to_string(),
            results.len(),
            failure.as_deref(),
        );

        Ok(TransactionOutcome {
            transaction_id,
            status,
            results,
            compensation,
            error: failure,
        })
    }

    /// Abort the active transaction before commit.
    ///
    /// Nothing has executed yet, so no compensations run.
    pub fn rollback(&self) -> Result<TransactionOutcome, TransactionError> {
        let transaction_id = {
            let active = self.active.lock();
            let transaction = active
                .as_ref()
                .ok_or(TransactionError::NoActiveTransaction)?;
            if transaction.status == TransactionStatus::Running {
                return Err(TransactionError::CommitInProgress {
                    transaction_id: transaction.id.clone(),
                });
            }
            transaction.id.clone()
        };

        let status = self.finish(&transaction_id, &TransactionEvent::RollBack, Vec::new())?;
        log_transaction_operation("rollback", &transaction_id, &status.to_string(), 0, None);

        Ok(TransactionOutcome {
            transaction_id,
            status,
            results: Vec::new(),
            compensation: Some(CompensationReport {
                results: Vec::new(),
                fully_compensated: true,
            }),
            error: None,
        })
    }

    /// Status of the active or any finished transaction
    pub fn status(&self, transaction_id: &str) -> Result<TransactionStatusReport, TransactionError> {
        if let Some(transaction) = self.active.lock().as_ref() {
            if transaction.id == transaction_id {
                return Ok(transaction.report());
            }
        }
        self.history
            .get(transaction_id)
            .map(|entry| entry.report())
            .ok_or_else(|| TransactionError::NotFound {
                transaction_id: transaction_id.to_string(),
            })
    }

    pub fn finished_count(&self) -> usize {
        self.history.len()
    }

    /// Forget finished transactions; returns how many were removed
    pub fn prune_finished(&self) -> usize {
        let mut removed = 0;
        self.history.retain(|_, _| {
            removed += 1;
            false
        });
        removed
    }

    /// Compensations to run after a failed commit, already in reverse order
    fn select_compensations(
        &self,
        results: &[CommandResult],
        compensations: &[Option<Command>],
    ) -> Vec<Command> {
        results
            .iter()
            .zip(compensations)
            .filter(|(result, _)| match self.scope {
                CompensationScope::Attempted => true,
                CompensationScope::Succeeded => result.success,
            })
            .filter_map(|(_, compensation)| compensation.clone())
            .rev()
            .collect()
    }

    async fn compensate(&self, transaction_id: &str, compensations: Vec<Command>) -> CompensationReport {
        if compensations.is_empty() {
            info!(transaction_id = %transaction_id, "No compensations registered for executed commands");
            return CompensationReport {
                results: Vec::new(),
                fully_compensated: true,
            };
        }

        info!(transaction_id = %transaction_id, count = compensations.len(), "Running compensations in reverse order");
        let results = self
            .batch
            .execute_sequential_with_policy(compensations, FailurePolicy::ContinueOnFailure)
            .await;

        for failed in results.iter().filter(|r| !r.success) {
            error!(
                transaction_id = %transaction_id,
                command_id = %failed.command_id,
                error = ?failed.error,
                "Compensation command failed"
            );
        }

        let fully_compensated = results.iter().all(|r| r.success);
        if !fully_compensated {
            warn!(transaction_id = %transaction_id, "Transaction compensation incomplete");
        }
        CompensationReport {
            results,
            fully_compensated,
        }
    }

    /// Apply the terminal event, archive the transaction and free the slot
    fn finish(
        &self,
        transaction_id: &str,
        event: &TransactionEvent,
        results: Vec<CommandResult>,
    ) -> Result<TransactionStatus, TransactionError> {
        let mut transaction = {
            let mut active = self.active.lock();
            match active.take() {
                Some(transaction) if transaction.id == transaction_id => transaction,
                other => {
                    *active = other;
                    return Err(TransactionError::NotFound {
                        transaction_id: transaction_id.to_string(),
                    });
                }
            }
        };

        let status = match transaction.status.apply(event) {
            Ok(status) => status,
            Err(e) => {
                // Keep the slot consistent even on an impossible transition
                error!(transaction_id = %transaction_id, error = %e, "Rejected transaction transition");
                TransactionStatus::Failed
            }
        };
        transaction.status = status;
        transaction.results = results;
        transaction.finished_at = Some(Utc::now());

        self.history.insert(transaction.id.clone(), transaction);
        self.slot.release(transaction_id);
        if status != TransactionStatus::RolledBack {
            self.stats
                .transaction_finished(status == TransactionStatus::Committed);
        }
        Ok(status)
    }
}
