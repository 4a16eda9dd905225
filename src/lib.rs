#![allow(clippy::doc_markdown)] // Allow technical terms like TCP, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Cmdflow Core
//!
//! Remote command execution and workflow orchestration for long-lived editing
//! hosts that accept JSON commands over TCP.
//!
//! ## Overview
//!
//! The engine keeps a bounded pool of connections to one remote host and sends
//! it self-describing JSON commands. On top of single commands it offers
//! sequential and parallel batches, an asynchronous queue, transactions with
//! compensating commands, and a step orchestrator that runs multi-step
//! workflows with timeouts, checkpoints and cancellation.
//!
//! ## Module Organization
//!
//! - [`execution`] - Transport, connection pool, executor, batches and queue
//! - [`transaction`] - Transactions with reverse-order compensation
//! - [`orchestration`] - Workflow orchestrator and step collaborators
//! - [`state_machine`] - Transaction, workflow and step lifecycles
//! - [`stats`] - Execution counters
//! - [`config`] - Layered configuration
//! - [`engine`] - The facade owning one instance of every component
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cmdflow_core::config::CmdflowConfig;
//! use cmdflow_core::engine::CommandEngine;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CommandEngine::start(CmdflowConfig::default()).await?;
//!
//! let result = engine
//!     .execute_single_command("create_widget", json!({"name": "MainMenu"}), None)
//!     .await;
//! println!("success={} data={:?}", result.success, result.data);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests against a local mock host
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod execution;
pub mod logging;
pub mod orchestration;
pub mod state_machine;
pub mod stats;
pub mod transaction;
pub mod utils;

pub use config::{CmdflowConfig, CompensationScope, ConfigManager, Framing};
pub use engine::CommandEngine;
pub use error::{CmdflowError, Result};
pub use execution::{
    BatchExecutor, Command, CommandErrorKind, CommandExecutor, CommandQueue, CommandResult,
    CommandSpec, ConnectionPool, FailurePolicy,
};
pub use orchestration::{
    StepOutcome, StepRunner, WorkflowDefinition, WorkflowOrchestrator, WorkflowOutcome,
    WorkflowProgress,
};
pub use state_machine::{StepStatus, TransactionStatus, WorkflowStatus};
pub use stats::{StatsCollector, StatsSnapshot};
pub use transaction::{TransactionManager, TransactionOutcome};
