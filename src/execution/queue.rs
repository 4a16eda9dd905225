//! # Command Queue
//!
//! Fire-and-forget command submission. One background worker drains an
//! unbounded channel in order; results only feed the stats collector.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::Command;
use super::executor::CommandExecutor;
use crate::error::{CmdflowError, Result};
use crate::stats::StatsCollector;

#[derive(Debug)]
pub struct CommandQueue {
    sender: mpsc::UnboundedSender<Command>,
    pending: Arc<watch::Sender<usize>>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<StatsCollector>,
}

impl CommandQueue {
    /// Create the queue and spawn its worker on the current runtime
    pub fn start(executor: Arc<CommandExecutor>, stats: Arc<StatsCollector>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            receiver,
            executor,
            pending.clone(),
            stats.clone(),
            shutdown.clone(),
        ));

        Self {
            sender,
            pending,
            shutdown,
            worker: Mutex::new(Some(worker)),
            stats,
        }
    }

    /// Submit a command without waiting; returns its id
    pub fn enqueue(&self, command: Command) -> Result<String> {
        if self.shutdown.is_cancelled() {
            return Err(CmdflowError::QueueClosed);
        }

        let command_id = command.id.clone();
        self.pending.send_modify(|n| *n += 1);
        if self.sender.send(command).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Err(CmdflowError::QueueClosed);
        }
        self.stats.command_enqueued();
        debug!(command_id = %command_id, "Command enqueued");
        Ok(command_id)
    }

    /// Commands enqueued but not yet fully processed
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until every enqueued command has been processed
    pub async fn wait_until_drained(&self, timeout: Option<Duration>) -> Result<()> {
        let mut receiver = self.pending.subscribe();
        let drained = async move {
            // The sender lives in self, so wait_for only fails after shutdown
            let _ = receiver.wait_for(|pending| *pending == 0).await;
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, drained).await.map_err(|_| {
                CmdflowError::Timeout(format!(
                    "command queue not drained within {}ms ({} pending)",
                    limit.as_millis(),
                    self.pending()
                ))
            }),
            None => {
                drained.await;
                Ok(())
            }
        }
    }

    /// Stop the worker; commands still queued are dropped
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Command queue worker ended abnormally");
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Command>,
    executor: Arc<CommandExecutor>,
    pending: Arc<watch::Sender<usize>>,
    stats: Arc<StatsCollector>,
    shutdown: CancellationToken,
) {
    info!("Command queue worker started");
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(command) => command,
                None => break,
            },
        };

        let result = executor.execute(command).await;
        if !result.success {
            debug!(command_id = %result.command_id, error = ?result.error, "Queued command failed");
        }
        stats.queued_command_processed();
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    receiver.close();
    let mut dropped = 0usize;
    while receiver.try_recv().is_ok() {
        dropped += 1;
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
    if dropped > 0 {
        warn!(dropped, "Command queue stopped with unprocessed commands");
    }
    info!("Command queue worker stopped");
}
