//! # Remote Command Execution
//!
//! Connection pooling, the request/response exchange with the editor host,
//! batch fan-out and the fire-and-forget queue.

pub mod batch;
pub mod command;
pub mod connection_pool;
pub mod executor;
pub mod message_protocols;
pub mod queue;
pub mod transport;

pub use batch::{BatchExecutor, FailurePolicy};
pub use command::{Command, CommandErrorKind, CommandResult, CommandSpec};
pub use connection_pool::{ConnectionPool, PoolError, PooledConnection};
pub use executor::{CommandExecutor, ExchangeError, ExecutorSettings};
pub use queue::CommandQueue;
pub use transport::{Connection, TcpTransport, Transport};
