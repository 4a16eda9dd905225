//! # Command Engine
//!
//! Owns every component of one engine instance: pool, executor, batch
//! executor, queue, transaction manager, workflow orchestrator and stats.
//! Nothing is process-global, so independent engines never share state.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::CmdflowConfig;
use crate::error::Result;
use crate::execution::{
    BatchExecutor, Command, CommandExecutor, CommandQueue, CommandResult, CommandSpec,
    ConnectionPool, ExecutorSettings, TcpTransport, Transport,
};
use crate::orchestration::{WorkflowDefinition, WorkflowOrchestrator, WorkflowProgress};
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::transaction::{TransactionManager, TransactionSlot};

#[derive(Debug)]
pub struct CommandEngine {
    config: CmdflowConfig,
    stats: Arc<StatsCollector>,
    pool: ConnectionPool,
    executor: Arc<CommandExecutor>,
    batch: BatchExecutor,
    queue: CommandQueue,
    transactions: Arc<TransactionManager>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl CommandEngine {
    /// Start an engine talking TCP to the configured host
    pub async fn start(config: CmdflowConfig) -> Result<Self> {
        let transport = Arc::new(TcpTransport::from_config(&config.remote));
        Self::start_with_transport(config, transport).await
    }

    /// Start an engine over any transport
    pub async fn start_with_transport(
        config: CmdflowConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsCollector::new());
        let pool = ConnectionPool::new(
            transport.clone(),
            config.remote.max_connections,
            config.remote.connection_timeout(),
            stats.clone(),
        );
        if config.remote.warm_pool_on_start {
            pool.warm_up().await;
        }

        let executor = Arc::new(CommandExecutor::new(
            pool.clone(),
            ExecutorSettings::from_config(&config),
            stats.clone(),
        ));
        let slot = TransactionSlot::new();
        let batch = BatchExecutor::new(executor.clone(), slot.clone());
        let queue = CommandQueue::start(executor.clone(), stats.clone());
        let transactions = Arc::new(TransactionManager::new(
            batch.clone(),
            slot,
            config.transaction.compensation_scope,
            stats.clone(),
        ));
        let orchestrator = Arc::new(WorkflowOrchestrator::new(config.workflow.clone()));

        info!(
            endpoint = %transport.describe(),
            max_connections = config.remote.max_connections,
            idle = pool.idle_count(),
            "✅ Command engine started"
        );

        Ok(Self {
            config,
            stats,
            pool,
            executor,
            batch,
            queue,
            transactions,
            orchestrator,
        })
    }

    /// Stop the queue worker and close every pooled connection
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.pool.close();
        info!("Command engine shut down");
    }

    pub fn config(&self) -> &CmdflowConfig {
        &self.config
    }

    /// Build a command carrying the configured timeout and retry budget
    pub fn new_command(&self, operation: impl Into<String>, params: Value) -> Command {
        Command::new(operation, params)
            .with_timeout(self.config.remote.command_timeout())
            .with_max_retries(self.config.retry.max_retries)
    }

    pub async fn execute_single_command(
        &self,
        operation: impl Into<String>,
        params: Value,
        timeout: Option<Duration>,
    ) -> CommandResult {
        let mut command = self.new_command(operation, params);
        if let Some(timeout) = timeout {
            command = command.with_timeout(timeout);
        }
        self.executor.execute(command).await
    }

    pub async fn execute_command(&self, command: Command) -> CommandResult {
        self.executor.execute(command).await
    }

    pub async fn execute_batch(&self, specs: Vec<CommandSpec>, parallel: bool) -> Vec<CommandResult> {
        let commands: Vec<Command> = specs
            .into_iter()
            .map(|spec| {
                spec.into_command(
                    self.config.remote.command_timeout(),
                    self.config.retry.max_retries,
                )
            })
            .collect();

        if parallel {
            self.batch.execute_parallel(commands).await
        } else {
            self.batch.execute_sequential(commands).await
        }
    }

    pub fn enqueue(&self, command: Command) -> Result<String> {
        self.queue.enqueue(command)
    }

    pub async fn wait_until_drained(&self, timeout: Option<Duration>) -> Result<()> {
        self.queue.wait_until_drained(timeout).await
    }

    pub fn start_workflow(
        &self,
        definition: Arc<WorkflowDefinition>,
        request: Value,
        context: Value,
    ) -> Result<Uuid> {
        Ok(self
            .orchestrator
            .start_workflow(definition, request, context)?)
    }

    pub fn get_progress(&self, workflow_id: Uuid) -> Result<WorkflowProgress> {
        Ok(self.orchestrator.get_progress(workflow_id)?)
    }

    pub fn cancel_workflow(&self, workflow_id: Uuid) -> bool {
        self.orchestrator.cancel(workflow_id)
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.transactions.active())
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn batch(&self) -> &BatchExecutor {
        &self.batch
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    pub fn orchestrator(&self) -> &Arc<WorkflowOrchestrator> {
        &self.orchestrator
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}
