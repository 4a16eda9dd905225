//! Connection Pool Management
//!
//! Bounded cache of reusable connections to one editor host. Idle connections
//! live in a short-lived `parking_lot` critical section; outstanding leases are
//! bounded by a semaphore so the pool never hands out more than its capacity.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::transport::{Connection, Transport};
use crate::stats::StatsCollector;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Resource unavailable: {reason}")]
    ResourceUnavailable { reason: String },

    #[error("Connection pool is closed")]
    Closed,
}

/// Connection pool for one remote host
///
/// Cloning shares the same pool.
///
/// # Examples
///
/// ```rust,no_run
/// use cmdflow_core::execution::connection_pool::ConnectionPool;
/// use cmdflow_core::execution::transport::TcpTransport;
/// use cmdflow_core::stats::StatsCollector;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Arc::new(TcpTransport::new("127.0.0.1:55557", Duration::from_secs(10)));
/// let pool = ConnectionPool::new(transport, 5, Duration::from_secs(10), Arc::new(StatsCollector::new()));
///
/// let lease = pool.acquire().await?;
/// pool.release(lease);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    transport: Arc<dyn Transport>,
    idle: Mutex<Vec<PoolEntry>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    connect_timeout: Duration,
    closed: AtomicBool,
    next_id: AtomicU64,
    stats: Arc<StatsCollector>,
}

#[derive(Debug)]
struct PoolEntry {
    id: u64,
    connection: Box<dyn Connection>,
}

/// A connection leased from the pool
///
/// Hand it back with [`ConnectionPool::release`] or [`ConnectionPool::discard`].
/// Dropping a lease discards its connection.
#[derive(Debug)]
pub struct PooledConnection {
    id: u64,
    connection: Box<dyn Connection>,
    reused: bool,
    ticket: LeaseTicket,
}

/// Returns the lease permit and lease gauge when dropped
#[derive(Debug)]
struct LeaseTicket {
    _permit: OwnedSemaphorePermit,
    stats: Arc<StatsCollector>,
}

impl Drop for LeaseTicket {
    fn drop(&mut self) {
        self.stats.lease_returned();
    }
}

impl PooledConnection {
    /// Pool-unique connection identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this connection came from the idle set rather than a fresh connect
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }
}

impl ConnectionPool {
    pub fn new(
        transport: Arc<dyn Transport>,
        capacity: usize,
        connect_timeout: Duration,
        stats: Arc<StatsCollector>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                transport,
                idle: Mutex::new(Vec::with_capacity(capacity)),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                connect_timeout,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                stats,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Number of connections currently leased out
    pub fn leased_count(&self) -> usize {
        self.inner
            .capacity
            .saturating_sub(self.inner.permits.available_permits())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Lease a connection, reusing an idle one when available
    ///
    /// Waits at most the connection timeout for a free lease slot and again
    /// at most the connection timeout to open a new connection.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = match tokio::time::timeout(
            self.inner.connect_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::ResourceUnavailable {
                    reason: format!(
                        "all {} connections leased for {}ms",
                        self.inner.capacity,
                        self.inner.connect_timeout.as_millis()
                    ),
                })
            }
        };

        let ticket = LeaseTicket {
            _permit: permit,
            stats: self.inner.stats.clone(),
        };
        self.inner.stats.lease_acquired();

        if let Some(entry) = self.pop_idle() {
            debug!(connection_id = entry.id, "Reusing idle connection");
            return Ok(PooledConnection {
                id: entry.id,
                connection: entry.connection,
                reused: true,
                ticket,
            });
        }

        // ticket drops on the error paths below, returning the slot
        let entry = self.open().await?;
        debug!(connection_id = entry.id, endpoint = %self.inner.transport.describe(), "Opened new connection");
        Ok(PooledConnection {
            id: entry.id,
            connection: entry.connection,
            reused: false,
            ticket,
        })
    }

    /// Return a leased connection for reuse, closing it if the pool is full
    pub fn release(&self, lease: PooledConnection) {
        let PooledConnection {
            id,
            connection,
            ticket,
            ..
        } = lease;

        if !self.is_closed() {
            let mut idle = self.inner.idle.lock();
            if idle.len() < self.inner.capacity {
                idle.push(PoolEntry { id, connection });
                self.inner.stats.set_idle_connections(idle.len());
                drop(idle);
                drop(ticket);
                return;
            }
        }

        debug!(connection_id = id, "Closing surplus connection");
        drop(connection);
        drop(ticket);
    }

    /// Close a leased connection whose state is no longer trusted
    pub fn discard(&self, lease: PooledConnection) {
        debug!(connection_id = lease.id, "Discarding connection");
        drop(lease);
    }

    /// Pre-open idle connections up to capacity
    ///
    /// Stops at the first failure; the host may simply not be up yet.
    pub async fn warm_up(&self) -> usize {
        let mut opened = 0;
        loop {
            if self.is_closed() || self.idle_count() + self.leased_count() >= self.inner.capacity {
                break;
            }
            match self.open().await {
                Ok(entry) => {
                    let mut idle = self.inner.idle.lock();
                    if idle.len() + self.leased_count() >= self.inner.capacity {
                        break;
                    }
                    idle.push(entry);
                    self.inner.stats.set_idle_connections(idle.len());
                    opened += 1;
                }
                Err(e) => {
                    warn!(endpoint = %self.inner.transport.describe(), error = %e, "Pool warm-up stopped");
                    break;
                }
            }
        }
        info!(opened, capacity = self.inner.capacity, "Connection pool warmed up");
        opened
    }

    /// Close every idle connection
    pub fn drain(&self) -> usize {
        let drained: Vec<PoolEntry> = {
            let mut idle = self.inner.idle.lock();
            let drained = idle.drain(..).collect();
            self.inner.stats.set_idle_connections(0);
            drained
        };
        let count = drained.len();
        drop(drained);
        debug!(count, "Drained idle connections");
        count
    }

    /// Drain and refuse further acquires
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        let drained = self.drain();
        info!(drained, "Connection pool closed");
    }

    fn pop_idle(&self) -> Option<PoolEntry> {
        let mut idle = self.inner.idle.lock();
        let entry = idle.pop();
        self.inner.stats.set_idle_connections(idle.len());
        entry
    }

    async fn open(&self) -> Result<PoolEntry, PoolError> {
        let endpoint = self.inner.transport.describe();
        let connection =
            match tokio::time::timeout(self.inner.connect_timeout, self.inner.transport.connect())
                .await
            {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => {
                    return Err(PoolError::ResourceUnavailable {
                        reason: format!("failed to connect to {endpoint}: {e}"),
                    })
                }
                Err(_) => {
                    return Err(PoolError::ResourceUnavailable {
                        reason: format!(
                            "connect to {endpoint} timed out after {}ms",
                            self.inner.connect_timeout.as_millis()
                        ),
                    })
                }
            };

        Ok(PoolEntry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            connection,
        })
    }
}
