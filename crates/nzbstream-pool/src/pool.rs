//! Bounded pool of reusable connections
//!
//! Connections are created lazily through a [`ConnectionManager`] and handed
//! out as [`PooledConnection`] guards. Dropping a guard returns the connection
//! to a LIFO idle stack (or destroys it if it was marked broken) and frees its
//! slot. Two background tasks run for the lifetime of the pool:
//!
//! - an idle sweep destroying connections unused for longer than the idle
//!   timeout, every half timeout
//! - a reconciliation pass comparing free slots against
//!   `max_connections - (live - idle)` and restoring slots lost to leaks

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, info, trace, warn};

use crate::cancel::CancellationToken;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::gate::SlotGate;

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Opens and closes the resources held by a [`ConnectionPool`]
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// Pooled resource
    type Connection: Send + 'static;
    /// Error returned when opening fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Tear down a connection that leaves the pool
    fn dispose(&self, connection: Self::Connection) {
        drop(connection);
    }
}

struct IdleConnection<C> {
    connection: C,
    last_used: Instant,
}

struct PoolShared<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    gate: SlotGate,
    idle: Mutex<Vec<IdleConnection<M::Connection>>>,
    live: AtomicUsize,
    disposed: AtomicBool,
    suspected_leak: AtomicUsize,
}

impl<M: ConnectionManager> PoolShared<M> {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn destroy(&self, connections: Vec<M::Connection>) {
        if connections.is_empty() {
            return;
        }
        self.live.fetch_sub(connections.len(), Ordering::SeqCst);
        for connection in connections {
            self.manager.dispose(connection);
        }
    }

    /// Most recently used idle connection that has not expired
    fn pop_fresh_idle(&self) -> Option<M::Connection> {
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.idle.lock();
            let mut found = None;
            while let Some(entry) = idle.pop() {
                if entry.last_used.elapsed() > self.config.idle_timeout {
                    stale.push(entry.connection);
                } else {
                    found = Some(entry.connection);
                    break;
                }
            }
            found
        };
        self.destroy(stale);
        found
    }

    fn evict_stale(&self) {
        let stale = {
            let mut idle = self.idle.lock();
            let entries = std::mem::take(&mut *idle);
            let mut stale = Vec::new();
            for entry in entries {
                if entry.last_used.elapsed() > self.config.idle_timeout {
                    stale.push(entry.connection);
                } else {
                    idle.push(entry);
                }
            }
            stale
        };
        if !stale.is_empty() {
            debug!("Evicting {} idle connections", stale.len());
        }
        self.destroy(stale);
    }

    /// Compare free slots with what live connections imply
    ///
    /// A shortfall must be seen on two consecutive passes before slots are
    /// restored, so an acquire caught between taking a slot and registering
    /// its connection is not mistaken for a leak.
    fn reconcile(&self) {
        if self.is_disposed() {
            return;
        }
        let idle = self.idle.lock().len();
        let live = self.live.load(Ordering::SeqCst);
        let in_use = live.saturating_sub(idle);
        let expected = self.config.max_connections.saturating_sub(in_use);
        let actual = self.gate.available();

        if actual < expected {
            let missing = expected - actual;
            let previous = self.suspected_leak.swap(missing, Ordering::SeqCst);
            let restore = previous.min(missing);
            if restore > 0 {
                warn!(
                    "Restoring {} leaked connection slots (live: {}, idle: {}, free: {})",
                    restore, live, idle, actual
                );
                self.gate.release(restore);
                self.suspected_leak.store(0, Ordering::SeqCst);
            }
        } else {
            self.suspected_leak.store(0, Ordering::SeqCst);
            if actual > expected {
                warn!(
                    "More free connection slots than expected ({} > {}), leaving as is",
                    actual, expected
                );
            }
        }
    }

    fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.gate.close();
        let drained: Vec<_> = std::mem::take(&mut *self.idle.lock())
            .into_iter()
            .map(|entry| entry.connection)
            .collect();
        let count = drained.len();
        self.destroy(drained);
        info!("Connection pool disposed, closed {} idle connections", count);
        true
    }

    fn give_back(&self, connection: M::Connection, broken: bool) {
        if broken {
            trace!("Destroying broken connection");
            self.destroy(vec![connection]);
        } else {
            let mut idle = self.idle.lock();
            if self.is_disposed() {
                drop(idle);
                self.destroy(vec![connection]);
            } else {
                idle.push(IdleConnection {
                    connection,
                    last_used: Instant::now(),
                });
            }
        }
        self.gate.release(1);
    }
}

/// Counters describing the pool at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured bound
    pub max_connections: usize,
    /// Connections that exist, idle or checked out
    pub live: usize,
    /// Connections waiting on the idle stack
    pub idle: usize,
    /// Free slots
    pub available: usize,
}

/// Bounded, lazily filled pool of connections
pub struct ConnectionPool<M: ConnectionManager> {
    shared: Arc<PoolShared<M>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Create a pool and start its background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let shared = Arc::new(PoolShared {
            manager,
            gate: SlotGate::new(config.max_connections),
            idle: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            suspected_leak: AtomicUsize::new(0),
            config,
        });
        let shutdown = CancellationToken::new();

        let sweep = spawn_periodic(
            Arc::downgrade(&shared),
            shutdown.clone(),
            shared.config.sweep_interval(),
            |shared| shared.evict_stale(),
        );
        let reconcile = spawn_periodic(
            Arc::downgrade(&shared),
            shutdown.clone(),
            shared.config.reconcile_interval.max(MIN_PERIOD),
            |shared| shared.reconcile(),
        );

        debug!(
            "Connection pool started with {} slots",
            shared.config.max_connections
        );

        Self {
            shared,
            shutdown,
            tasks: Mutex::new(vec![sweep, reconcile]),
        }
    }

    /// Check out a connection
    ///
    /// Waits until more than `reserved_slots` slots are free, then reuses the
    /// most recently returned idle connection or opens a new one.
    pub async fn acquire(
        &self,
        reserved_slots: usize,
        cancel: &CancellationToken,
    ) -> PoolResult<PooledConnection<M>> {
        let shared = &self.shared;
        if shared.is_disposed() {
            return Err(PoolError::Disposed);
        }

        shared.gate.acquire(reserved_slots, cancel).await?;

        if shared.is_disposed() {
            shared.gate.release(1);
            return Err(PoolError::Disposed);
        }

        if let Some(connection) = shared.pop_fresh_idle() {
            trace!("Reusing idle connection");
            return Ok(PooledConnection::new(shared.clone(), connection));
        }

        shared.live.fetch_add(1, Ordering::SeqCst);
        let opened = tokio::select! {
            result = shared.manager.connect() => Some(result),
            () = cancel.cancelled() => None,
        };

        match opened {
            Some(Ok(connection)) => {
                debug!(
                    "Opened new connection ({} live)",
                    shared.live.load(Ordering::SeqCst)
                );
                Ok(PooledConnection::new(shared.clone(), connection))
            }
            Some(Err(e)) => {
                shared.live.fetch_sub(1, Ordering::SeqCst);
                shared.gate.release(1);
                warn!("Failed to open connection: {}", e);
                Err(PoolError::Connect { source: Box::new(e) })
            }
            None => {
                shared.live.fetch_sub(1, Ordering::SeqCst);
                shared.gate.release(1);
                Err(PoolError::Cancelled)
            }
        }
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_connections: self.shared.config.max_connections,
            live: self.shared.live.load(Ordering::SeqCst),
            idle: self.shared.idle.lock().len(),
            available: self.shared.gate.available(),
        }
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.shared.gate.available()
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether [`ConnectionPool::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Stop background tasks and close idle connections
    ///
    /// Waiters fail with [`PoolError::Disposed`]. Checked out connections are
    /// destroyed when their guards drop. Calling this twice is a no-op.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.dispose();
    }
}

impl<M: ConnectionManager> Drop for ConnectionPool<M> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<M: ConnectionManager> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn spawn_periodic<M, F>(
    shared: Weak<PoolShared<M>>,
    shutdown: CancellationToken,
    period: Duration,
    tick: F,
) -> JoinHandle<()>
where
    M: ConnectionManager,
    F: Fn(&PoolShared<M>) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }
            let Some(shared) = shared.upgrade() else {
                break;
            };
            tick(shared.as_ref());
        }
        trace!("Pool background task exited");
    })
}

/// Connection checked out of a [`ConnectionPool`]
///
/// Returned to the pool on drop. Call [`PooledConnection::mark_broken`]
/// after an I/O failure so it is destroyed instead of reused.
pub struct PooledConnection<M: ConnectionManager> {
    shared: Arc<PoolShared<M>>,
    connection: Option<M::Connection>,
    broken: bool,
}

impl<M: ConnectionManager> PooledConnection<M> {
    fn new(shared: Arc<PoolShared<M>>, connection: M::Connection) -> Self {
        Self {
            shared,
            connection: Some(connection),
            broken: false,
        }
    }

    /// Destroy the connection instead of returning it to the idle stack
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether [`PooledConnection::mark_broken`] was called
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.shared.give_back(connection, self.broken);
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}
