//! Error types for pool and gate operations

use thiserror::Error;

/// Pool operation result type
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised while acquiring pooled resources
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool (or gate) was disposed; callers must not retry against it
    #[error("Connection pool has been disposed")]
    Disposed,

    /// The caller's cancellation token fired while waiting
    #[error("Operation cancelled while waiting for a connection slot")]
    Cancelled,

    /// The connection manager failed to open a new connection
    #[error("Failed to open connection: {source}")]
    Connect {
        /// Error reported by the connection manager
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PoolError {
    /// Whether a later attempt against the same pool could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}
