//! Ready-made step collaborators.
//!
//! - [`FnStep`] wraps an async closure.
//! - [`CommandStep`] turns the cumulative state into remote commands and runs
//!   them in order, stopping at the first failure.
//! - [`TransactionStep`] does the same inside one transaction, so a failure
//!   runs the registered compensations.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{StateMap, StepInput, StepOutcome, StepRunner};
use crate::execution::command::Command;
use crate::execution::executor::CommandExecutor;
use crate::transaction::TransactionManager;

/// Builds the forward commands for a step from its input
pub type CommandBuilder = dyn Fn(&StepInput) -> Result<Vec<Command>, String> + Send + Sync;

/// Builds forward commands paired with optional compensations
pub type CompensatedCommandBuilder =
    dyn Fn(&StepInput) -> Result<Vec<(Command, Option<Command>)>, String> + Send + Sync;

/// Step backed by an async closure
pub struct FnStep<F> {
    collaborator_id: String,
    required_inputs: Vec<String>,
    run: F,
}

impl<F, Fut> FnStep<F>
where
    F: Fn(StepInput, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    pub fn new(collaborator_id: impl Into<String>, run: F) -> Self {
        Self {
            collaborator_id: collaborator_id.into(),
            required_inputs: Vec::new(),
            run,
        }
    }

    pub fn with_required_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs = keys.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl<F, Fut> StepRunner for FnStep<F>
where
    F: Fn(StepInput, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    fn collaborator_id(&self) -> &str {
        &self.collaborator_id
    }

    fn required_inputs(&self) -> Vec<String> {
        self.required_inputs.clone()
    }

    async fn run_step(&self, input: StepInput, cancel: CancellationToken) -> StepOutcome {
        (self.run)(input, cancel).await
    }
}

/// Step that issues remote commands through the command executor
pub struct CommandStep {
    collaborator_id: String,
    required_inputs: Vec<String>,
    executor: Arc<CommandExecutor>,
    build: Box<CommandBuilder>,
    output_key: String,
}

impl CommandStep {
    pub fn new<B>(
        collaborator_id: impl Into<String>,
        executor: Arc<CommandExecutor>,
        output_key: impl Into<String>,
        build: B,
    ) -> Self
    where
        B: Fn(&StepInput) -> Result<Vec<Command>, String> + Send + Sync + 'static,
    {
        Self {
            collaborator_id: collaborator_id.into(),
            required_inputs: Vec::new(),
            executor,
            build: Box::new(build),
            output_key: output_key.into(),
        }
    }

    pub fn with_required_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs = keys.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl StepRunner for CommandStep {
    fn collaborator_id(&self) -> &str {
        &self.collaborator_id
    }

    fn required_inputs(&self) -> Vec<String> {
        self.required_inputs.clone()
    }

    async fn run_step(&self, input: StepInput, cancel: CancellationToken) -> StepOutcome {
        let commands = match (self.build)(&input) {
            Ok(commands) => commands,
            Err(e) => return StepOutcome::failure(e),
        };

        let mut payloads = Vec::with_capacity(commands.len());
        for command in commands {
            if cancel.is_cancelled() {
                return StepOutcome::failure("step cancelled before all commands were issued");
            }
            let operation = command.operation.clone();
            let result = self.executor.execute(command).await;
            if !result.success {
                return StepOutcome::failure(format!(
                    "command '{operation}' failed: {}",
                    result.error.unwrap_or_default()
                ));
            }
            debug!(step = %input.step_name, operation = %operation, "Step command succeeded");
            payloads.push(result.data.unwrap_or(Value::Null));
        }

        let mut output = StateMap::new();
        output.insert(self.output_key.clone(), Value::Array(payloads));
        StepOutcome::success(output)
    }
}

/// Step that runs its commands as one transaction
pub struct TransactionStep {
    collaborator_id: String,
    required_inputs: Vec<String>,
    transactions: Arc<TransactionManager>,
    build: Box<CompensatedCommandBuilder>,
    output_key: String,
}

impl TransactionStep {
    pub fn new<B>(
        collaborator_id: impl Into<String>,
        transactions: Arc<TransactionManager>,
        output_key: impl Into<String>,
        build: B,
    ) -> Self
    where
        B: Fn(&StepInput) -> Result<Vec<(Command, Option<Command>)>, String>
            + Send
            + Sync
            + 'static,
    {
        Self {
            collaborator_id: collaborator_id.into(),
            required_inputs: Vec::new(),
            transactions,
            build: Box::new(build),
            output_key: output_key.into(),
        }
    }

    pub fn with_required_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Roll back a transaction that never reached commit
    fn abandon(&self, transaction_id: &str) -> bool {
        match self.transactions.rollback() {
            Ok(_) => true,
            Err(e) => {
                warn!(transaction_id = %transaction_id, error = %e, "Could not roll back abandoned transaction");
                false
            }
        }
    }
}

#[async_trait]
impl StepRunner for TransactionStep {
    fn collaborator_id(&self) -> &str {
        &self.collaborator_id
    }

    fn required_inputs(&self) -> Vec<String> {
        self.required_inputs.clone()
    }

    async fn run_step(&self, input: StepInput, cancel: CancellationToken) -> StepOutcome {
        let commands = match (self.build)(&input) {
            Ok(commands) => commands,
            Err(e) => return StepOutcome::failure(e),
        };
        if cancel.is_cancelled() {
            return StepOutcome::failure("step cancelled before the transaction started");
        }

        let transaction_id = match self.transactions.begin() {
            Ok(id) => id,
            Err(e) => return StepOutcome::failure(e.to_string()),
        };

        for (command, compensation) in commands {
            if let Err(e) = self.transactions.add_command(command, compensation) {
                self.abandon(&transaction_id);
                return StepOutcome::failure(e.to_string());
            }
        }

        let outcome = match self.transactions.commit().await {
            Ok(outcome) => outcome,
            Err(e) => return StepOutcome::failure(e.to_string()),
        };

        if outcome.is_committed() {
            let payloads: Vec<Value> = outcome
                .results
                .iter()
                .map(|r| r.data.clone().unwrap_or(Value::Null))
                .collect();
            let mut output = StateMap::new();
            output.insert(
                self.output_key.clone(),
                json!({"transaction_id": transaction_id, "results": payloads}),
            );
            return StepOutcome::success(output);
        }

        let mut failure = StepOutcome::failure(
            outcome
                .error
                .unwrap_or_else(|| format!("transaction {transaction_id} failed")),
        );
        if let Some(report) = &outcome.compensation {
            if !report.fully_compensated {
                failure = failure.with_warning(format!(
                    "Compensation incomplete for transaction {transaction_id}"
                ));
            }
        }
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::batch::BatchExecutor;
    use crate::execution::connection_pool::ConnectionPool;
    use crate::execution::executor::ExecutorSettings;
    use crate::execution::transport::{Connection, Transport};
    use crate::stats::StatsCollector;
    use crate::transaction::TransactionSlot;
    use std::io;
    use std::time::Duration;

    #[derive(Debug)]
    struct RefusingTransport;

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn connect(&self) -> io::Result<Box<dyn Connection>> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }

        fn describe(&self) -> String {
            "memory://refusing".to_string()
        }
    }

    fn transaction_step() -> (TransactionStep, Arc<TransactionManager>) {
        let stats = Arc::new(StatsCollector::new());
        let pool = ConnectionPool::new(Arc::new(RefusingTransport), 1, Duration::from_millis(10), stats.clone());
        let executor = Arc::new(CommandExecutor::new(pool, ExecutorSettings::default(), stats.clone()));
        let slot = TransactionSlot::new();
        let transactions = Arc::new(TransactionManager::new(
            BatchExecutor::new(executor, slot.clone()),
            slot,
            Default::default(),
            stats,
        ));
        let step = TransactionStep::new("binder", transactions.clone(), "bindings", |_| Ok(Vec::new()));
        (step, transactions)
    }

    #[test]
    fn test_abandon_rolls_back_pending_transaction() {
        let (step, transactions) = transaction_step();
        let transaction_id = transactions.begin().unwrap();

        assert!(step.abandon(&transaction_id));
        assert!(transactions.active().is_none());
        assert_eq!(transactions.finished_count(), 1);
    }

    #[test]
    fn test_abandon_reports_rollback_failure_without_raising() {
        let (step, transactions) = transaction_step();

        assert!(!step.abandon("missing"));
        assert!(transactions.active().is_none());
        assert_eq!(transactions.finished_count(), 0);
    }
}
