//! # Stats Collector
//!
//! Rolling counters shared by the pool, executor, queue and transaction
//! manager of one engine instance. Every counter is an atomic so recording
//! never blocks command execution.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct StatsCollector {
    commands_executed: AtomicU64,
    failed_commands: AtomicU64,
    total_retries: AtomicU64,
    total_execution_micros: AtomicU64,
    active_leases: AtomicUsize,
    idle_connections: AtomicUsize,
    queued_commands: AtomicUsize,
    queue_processed: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_failed: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub commands_executed: u64,
    pub failed_commands: u64,
    pub success_rate: f64,
    pub total_retries: u64,
    pub average_response_time_ms: f64,
    pub active_leases: usize,
    pub idle_connections: usize,
    pub queued_commands: usize,
    pub queue_processed: u64,
    pub transactions_committed: u64,
    pub transactions_failed: u64,
    pub active_transaction: Option<String>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final outcome of one command execution
    pub fn record_command(&self, elapsed: Duration, success: bool, retries: u32) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_commands.fetch_add(1, Ordering::Relaxed);
        }
        self.total_retries
            .fetch_add(u64::from(retries), Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_execution_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn lease_acquired(&self) {
        self.active_leases.fetch_add(1, Ordering::AcqRel);
    }

    pub fn lease_returned(&self) {
        // Saturating: a drained pool may return leases it no longer tracks
        let _ = self
            .active_leases
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn set_idle_connections(&self, idle: usize) {
        self.idle_connections.store(idle, Ordering::Release);
    }

    pub fn command_enqueued(&self) {
        self.queued_commands.fetch_add(1, Ordering::AcqRel);
    }

    pub fn queued_command_processed(&self) {
        let _ = self
            .queued_commands
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
        self.queue_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transaction_finished(&self, committed: bool) {
        if committed {
            self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transactions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn active_leases(&self) -> usize {
        self.active_leases.load(Ordering::Acquire)
    }

    pub fn snapshot(&self, active_transaction: Option<String>) -> StatsSnapshot {
        let executed = self.commands_executed.load(Ordering::Relaxed);
        let failed = self.failed_commands.load(Ordering::Relaxed);
        let total_micros = self.total_execution_micros.load(Ordering::Relaxed);

        let average_response_time_ms = if executed > 0 {
            (total_micros as f64 / executed as f64) / 1_000.0
        } else {
            0.0
        };

        StatsSnapshot {
            commands_executed: executed,
            failed_commands: failed,
            success_rate: (executed.saturating_sub(failed)) as f64 / executed.max(1) as f64,
            total_retries: self.total_retries.load(Ordering::Relaxed),
            average_response_time_ms,
            active_leases: self.active_leases.load(Ordering::Acquire),
            idle_connections: self.idle_connections.load(Ordering::Acquire),
            queued_commands: self.queued_commands.load(Ordering::Acquire),
            queue_processed: self.queue_processed.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            active_transaction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsCollector::new();
        let snapshot = stats.snapshot(None);
        assert_eq!(snapshot.commands_executed, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.average_response_time_ms, 0.0);
    }

    #[test]
    fn test_average_latency_and_success_rate() {
        let stats = StatsCollector::new();
        stats.record_command(Duration::from_millis(10), true, 0);
        stats.record_command(Duration::from_millis(30), false, 3);

        let snapshot = stats.snapshot(Some("tx".to_string()));
        assert_eq!(snapshot.commands_executed, 2);
        assert_eq!(snapshot.failed_commands, 1);
        assert_eq!(snapshot.total_retries, 3);
        assert!((snapshot.average_response_time_ms - 20.0).abs() < 0.001);
        assert!((snapshot.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.active_transaction.as_deref(), Some("tx"));
    }

    #[test]
    fn test_gauges_never_underflow() {
        let stats = StatsCollector::new();
        stats.lease_returned();
        stats.queued_command_processed();
        assert_eq!(stats.active_leases(), 0);
        assert_eq!(stats.snapshot(None).queued_commands, 0);
        assert_eq!(stats.snapshot(None).queue_processed, 1);
    }
}
