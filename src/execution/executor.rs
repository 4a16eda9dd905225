//! # Command Executor
//!
//! Sends one command over a leased connection, waits a bounded time for the
//! complete reply and retries transient failures with linear backoff. Every
//! failure class is folded into the returned [`CommandResult`].

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::command::{Command, CommandErrorKind, CommandResult};
use super::connection_pool::{ConnectionPool, PoolError};
use super::message_protocols::{
    decode_response, interpret_response, ProtocolError, RemoteReply, RequestEnvelope,
};
use super::transport::Connection;
use crate::config::{CmdflowConfig, Framing, RetryConfig};
use crate::logging::log_command_operation;
use crate::stats::StatsCollector;

/// Failure of a single request/response attempt
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer closed the connection before sending any reply bytes
    #[error("Transport error: connection closed before receiving data")]
    ClosedBeforeReply,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Application(String),

    #[error("No response within {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ExchangeError {
    pub fn kind(&self) -> CommandErrorKind {
        match self {
            Self::Pool(_) => CommandErrorKind::ResourceUnavailable,
            Self::Transport(_) | Self::ClosedBeforeReply => CommandErrorKind::Transport,
            Self::Protocol(_) => CommandErrorKind::Protocol,
            Self::Application(_) => CommandErrorKind::Application,
            Self::Timeout(_) => CommandErrorKind::Timeout,
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self, retry: &RetryConfig) -> bool {
        match self {
            Self::Pool(PoolError::Closed) => false,
            Self::Application(_) => retry.retry_application_errors,
            _ => true,
        }
    }
}

/// Executor settings derived from [`CmdflowConfig`]
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub retry: RetryConfig,
    pub framing: Framing,
    pub reuse_connections: bool,
    pub max_response_bytes: usize,
}

impl ExecutorSettings {
    pub fn from_config(config: &CmdflowConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            framing: config.remote.framing,
            reuse_connections: config.remote.reuse_connections,
            max_response_bytes: config.remote.max_response_bytes,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&CmdflowConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    pool: ConnectionPool,
    settings: ExecutorSettings,
    stats: Arc<StatsCollector>,
}

impl CommandExecutor {
    pub fn new(pool: ConnectionPool, settings: ExecutorSettings, stats: Arc<StatsCollector>) -> Self {
        Self {
            pool,
            settings,
            stats,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute one command to completion, retrying within its budget.
    ///
    /// Always produces exactly one result whose `command_id` equals
    /// `command.id`.
    #[instrument(skip(self, command), fields(command_id = %command.id, operation = %command.operation))]
    pub async fn execute(&self, mut command: Command) -> CommandResult {
        let started = Instant::now();
        let max_attempts = command.max_attempts();
        let mut attempt: u32 = 0;

        let result = loop {
            if attempt > 0 {
                command.retry_count = attempt;
                let backoff = self.settings.retry.backoff_for_attempt(attempt - 1);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(backoff).await;
            }

            match self.attempt(&command).await {
                Ok(payload) => {
                    break CommandResult::success(
                        &command.id,
                        payload,
                        started.elapsed(),
                        command.retry_count,
                    );
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, max_attempts, error = %e, "Command attempt failed");
                    attempt += 1;
                    if attempt >= max_attempts || !e.is_retryable(&self.settings.retry) {
                        let message = if command.retry_count > 0 {
                            format!("{e} (after {} retries)", command.retry_count)
                        } else {
                            e.to_string()
                        };
                        break CommandResult::failure(
                            &command.id,
                            e.kind(),
                            message,
                            started.elapsed(),
                            command.retry_count,
                        );
                    }
                }
            }
        };

        self.stats
            .record_command(result.execution_time, result.success, result.retry_count);
        log_command_operation(
            "execute",
            &command.id,
            &command.operation,
            if result.success { "success" } else { "failed" },
            Some(result.execution_time.as_millis() as u64),
            result.error.as_deref(),
        );
        result
    }

    async fn attempt(&self, command: &Command) -> Result<serde_json::Value, ExchangeError> {
        loop {
            let mut lease = self.pool.acquire().await?;
            let reused = lease.is_reused();

            let exchange = tokio::time::timeout(
                command.timeout,
                exchange(
                    lease.connection(),
                    command,
                    self.settings.framing,
                    self.settings.max_response_bytes,
                ),
            )
            .await;

            match exchange {
                Err(_) => {
                    self.pool.discard(lease);
                    return Err(ExchangeError::Timeout(command.timeout));
                }
                Ok(Err(ExchangeError::ClosedBeforeReply)) if reused => {
                    // Stale idle connection; reconnecting does not spend a retry
                    debug!(connection_id = lease.id(), "Idle connection was closed by the host, reconnecting");
                    self.pool.discard(lease);
                }
                Ok(Err(e)) => {
                    self.pool.discard(lease);
                    return Err(e);
                }
                Ok(Ok(reply)) => {
                    if self.settings.reuse_connections {
                        self.pool.release(lease);
                    } else {
                        self.pool.discard(lease);
                    }
                    return match reply {
                        RemoteReply::Success(payload) => Ok(payload),
                        RemoteReply::Failure(message) => Err(ExchangeError::Application(message)),
                    };
                }
            }
        }
    }
}

/// One request/response round trip on an exclusively held connection
async fn exchange(
    connection: &mut dyn Connection,
    command: &Command,
    framing: Framing,
    max_response_bytes: usize,
) -> Result<RemoteReply, ExchangeError> {
    let request = RequestEnvelope::for_command(command).encode(framing)?;
    connection.send(&request).await.map_err(|e| {
        if closed_by_peer(&e) {
            ExchangeError::ClosedBeforeReply
        } else {
            ExchangeError::Transport(format!("send failed: {e}"))
        }
    })?;

    let mut buf = Vec::new();
    loop {
        let read = match connection.receive(&mut buf).await {
            Ok(read) => read,
            Err(e) if closed_by_peer(&e) && buf.is_empty() => {
                return Err(ExchangeError::ClosedBeforeReply)
            }
            Err(e) => return Err(ExchangeError::Transport(format!("receive failed: {e}"))),
        };

        if read == 0 {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return Err(ExchangeError::ClosedBeforeReply);
            }
            return match decode_response(&buf, max_response_bytes)? {
                Some(value) => Ok(interpret_response(value)?),
                None => Err(ProtocolError::Truncated.into()),
            };
        }

        if let Some(value) = decode_response(&buf, max_response_bytes)? {
            return Ok(interpret_response(value)?);
        }
    }
}

fn closed_by_peer(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::transport::Transport;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with canned byte strings, one per connection
    #[derive(Debug, Default)]
    struct CannedTransport {
        replies: Mutex<VecDeque<Option<Vec<u8>>>>,
        connects: AtomicUsize,
    }

    #[derive(Debug)]
    struct CannedConnection {
        reply: Option<Vec<u8>>,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn connect(&self) -> io::Result<Box<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().pop_front() {
                Some(reply) => Ok(Box::new(CannedConnection { reply })),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            }
        }

        fn describe(&self) -> String {
            "memory://canned".to_string()
        }
    }

    #[async_trait]
    impl Connection for CannedConnection {
        async fn send(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }

        async fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
            match self.reply.take() {
                Some(bytes) => {
                    buf.extend_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => Ok(0),
            }
        }
    }

    fn executor_for(replies: Vec<Option<&str>>, max_retries: u32) -> (CommandExecutor, Arc<CannedTransport>, Arc<StatsCollector>) {
        let transport = Arc::new(CannedTransport {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(|s| s.as_bytes().to_vec()))
                    .collect(),
            ),
            connects: AtomicUsize::new(0),
        });
        let stats = Arc::new(StatsCollector::new());
        let pool = ConnectionPool::new(transport.clone(), 2, Duration::from_millis(100), stats.clone());
        let mut settings = ExecutorSettings::default();
        settings.retry.max_retries = max_retries;
        settings.retry.backoff_base_ms = 1;
        settings.reuse_connections = false;
        (CommandExecutor::new(pool, settings, stats.clone()), transport, stats)
    }

    #[tokio::test]
    async fn test_success_payload_and_id() {
        let (executor, _, stats) = executor_for(vec![Some(r#"{"success":true,"result":{"id":3}}"#)], 0);
        let command = Command::new("spawn", json!({})).with_max_retries(0);
        let id = command.id.clone();

        let result = executor.execute(command).await;
        assert!(result.success);
        assert_eq!(result.command_id, id);
        assert_eq!(result.data, Some(json!({"id": 3})));
        assert_eq!(stats.snapshot(None).commands_executed, 1);
    }

    #[tokio::test]
    async fn test_application_error_is_retried_then_reported() {
        let (executor, transport, _) = executor_for(
            vec![
                Some(r#"{"success":false,"error":"Blueprint not found"}"#),
                Some(r#"{"status":"error","message":"Blueprint not found"}"#),
            ],
            1,
        );

        let result = executor.execute(Command::new("compile", json!({})).with_max_retries(1)).await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 1);
        assert_eq!(result.error_kind, Some(CommandErrorKind::Application));
        assert!(result.error.unwrap().contains("Blueprint not found"));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_protocol_failures_classified() {
        let (executor, _, _) = executor_for(vec![Some("{\"success\": tr")], 0);
        let result = executor.execute(Command::new("x", json!({})).with_max_retries(0)).await;
        assert_eq!(result.error_kind, Some(CommandErrorKind::Protocol));
        assert!(result.error.unwrap().contains("truncated"));

        let (executor, _, _) = executor_for(vec![None], 0);
        let result = executor.execute(Command::new("x", json!({})).with_max_retries(0)).await;
        assert_eq!(result.error_kind, Some(CommandErrorKind::Transport));
        assert!(result.error.unwrap().contains("closed before receiving data"));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let (executor, _, stats) = executor_for(
            vec![Some("not json"), Some(r#"{"status":"success"}"#)],
            2,
        );
        let result = executor.execute(Command::new("x", json!({})).with_max_retries(2)).await;
        assert!(result.success);
        assert_eq!(result.retry_count, 1);
        assert_eq!(stats.snapshot(None).total_retries, 1);
    }

    #[tokio::test]
    async fn test_stale_idle_connection_reconnects_without_retry() {
        // Each canned connection answers once and then reads EOF
        let ok = r#"{"success":true,"result":1}"#;
        let (mut executor, transport, stats) = executor_for(vec![Some(ok), Some(ok)], 0);
        executor.settings.reuse_connections = true;

        let first = executor.execute(Command::new("a", json!({})).with_max_retries(0)).await;
        assert!(first.success);
        assert_eq!(executor.pool().idle_count(), 1);

        let second = executor.execute(Command::new("b", json!({})).with_max_retries(0)).await;
        assert!(second.success, "unexpected failure: {:?}", second.error);
        assert_eq!(second.retry_count, 0);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot(None).total_retries, 0);
    }

    #[tokio::test]
    async fn test_fresh_connection_closed_early_is_a_failure() {
        let (executor, transport, _) = executor_for(vec![None, None], 1);
        let result = executor.execute(Command::new("x", json!({})).with_max_retries(1)).await;

        assert!(!result.success);
        assert_eq!(result.retry_count, 1);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    }
}
