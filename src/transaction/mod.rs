//! # Transactions
//!
//! All-or-nothing groups of remote commands with optional compensating
//! commands. One transaction may be active per engine instance; a failed
//! commit runs the registered compensations in reverse order.

pub mod manager;
pub mod slot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::command::{Command, CommandResult};
use crate::state_machine::{TransactionStatus, TransitionError};

pub use manager::TransactionManager;
pub use slot::TransactionSlot;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Another transaction is already active: {active}")]
    Busy { active: String },

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("Transaction {transaction_id} has started committing; no commands may be added")]
    AlreadyCommitting { transaction_id: String },

    #[error("Transaction {transaction_id} is committing; wait for the commit to finish")]
    CommitInProgress { transaction_id: String },

    #[error("Unknown transaction: {transaction_id}")]
    NotFound { transaction_id: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// One group of forward commands and their optional compensations
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub commands: Vec<Command>,
    /// Parallel to `commands`
    pub compensations: Vec<Option<Command>>,
    pub status: TransactionStatus,
    pub results: Vec<CommandResult>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            commands: Vec::new(),
            compensations: Vec::new(),
            status: TransactionStatus::Pending,
            results: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn report(&self) -> TransactionStatusReport {
        let completed_commands = self.results.iter().filter(|r| r.success).count();
        let end = self.finished_at.unwrap_or_else(Utc::now);
        TransactionStatusReport {
            transaction_id: self.id.clone(),
            status: self.status,
            command_count: self.commands.len(),
            completed_commands,
            success_rate: if self.commands.is_empty() {
                0.0
            } else {
                completed_commands as f64 / self.commands.len() as f64
            },
            created_at: self.created_at,
            duration_ms: (end - self.created_at).num_milliseconds().max(0) as u64,
        }
    }
}

/// Queryable summary of a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatusReport {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub command_count: usize,
    pub completed_commands: usize,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Results of running compensations after a failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationReport {
    /// In execution order (reverse of registration)
    pub results: Vec<CommandResult>,
    pub fully_compensated: bool,
}

/// Terminal outcome of a commit or manual rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub transaction_id: String,
    pub status: TransactionStatus,
    /// Forward command results, in order, up to and including the first failure
    pub results: Vec<CommandResult>,
    pub compensation: Option<CompensationReport>,
    pub error: Option<String>,
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }
}
