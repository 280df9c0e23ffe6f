//! Bounded connection pooling and priority admission for segment fetching
//!
//! Every article fetch, whether it serves an interactive read or a background
//! ingest, goes through two layers:
//!
//! 1. [`PriorityGate`] decides which waiting caller runs next. Interactive
//!    callers ([`Priority::High`]) win a released permit with probability
//!    `high_priority_odds`; background callers are slowed but never starved.
//! 2. [`ConnectionPool`] bounds live connections, reuses idle ones LIFO, and
//!    keeps `reserved_slots` free for interactive reads when background work
//!    asks for a connection.
//!
//! Cancellation is cooperative through [`CancellationToken`], passed along
//! with the reservation in an [`AcquireContext`].
//!
//! ```rust,no_run
//! use nzbstream_pool::{CancellationToken, ConnectionManager, ConnectionPool, PoolConfig};
//!
//! struct Dialer;
//!
//! #[async_trait::async_trait]
//! impl ConnectionManager for Dialer {
//!     type Connection = tokio::net::TcpStream;
//!     type Error = std::io::Error;
//!
//!     async fn connect(&self) -> Result<Self::Connection, Self::Error> {
//!         tokio::net::TcpStream::connect("news.example.com:119").await
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ConnectionPool::new(Dialer, PoolConfig::new(8));
//! let token = CancellationToken::new();
//! let conn = pool.acquire(0, &token).await?;
//! drop(conn);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod pool;
pub mod priority;

pub use cancel::{CancellationToken, TimeoutToken};
pub use config::PoolConfig;
pub use context::{AcquireContext, Priority};
pub use error::{PoolError, PoolResult};
pub use gate::SlotGate;
pub use pool::{ConnectionManager, ConnectionPool, PoolStats, PooledConnection};
pub use priority::{DEFAULT_HIGH_PRIORITY_ODDS, GatePermit, PriorityGate};
