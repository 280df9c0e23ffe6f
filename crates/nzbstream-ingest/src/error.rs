//! Error types for transport and ingest operations
//!
//! The orchestrator is the only place that turns an error into a retry,
//! a failure or an abandoned run. Everything below it propagates errors
//! unchanged, so the classification helpers here drive that decision.

use std::time::Duration;

use nzbstream_formats::FormatError;
use nzbstream_index::IndexError;
use nzbstream_pool::PoolError;
use thiserror::Error;

/// Transport operation result type
pub type TransportResult<T> = Result<T, TransportError>;

/// Ingest operation result type
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors raised while fetching articles
#[derive(Debug, Error)]
pub enum TransportError {
    /// The article is permanently gone from the server
    #[error("Article not found: {0}")]
    NotFound(String),

    /// Connection refused, authentication hiccup or a dropped socket
    #[error("Transient transport failure: {0}")]
    Transient(String),

    /// Server answered with something that could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The caller's token fired
    #[error("Transport operation cancelled")]
    Cancelled,

    /// Connection pool failure other than cancellation
    #[error("Connection pool error: {0}")]
    Pool(PoolError),
}

impl TransportError {
    /// Whether the same request could succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Pool(e) => e.is_retryable(),
            Self::NotFound(_) | Self::Protocol(_) | Self::Cancelled => false,
        }
    }

    /// Whether the article is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the error only reports cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<PoolError> for TransportError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Cancelled => Self::Cancelled,
            other => Self::Pool(other),
        }
    }
}

/// Errors raised by the ingest pipeline
#[derive(Debug, Error)]
pub enum IngestError {
    /// Article fetch failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Archive structure could not be used
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Index model, search or store failure
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Neither article headers nor segments reveal the size of a file
    #[error("Cannot determine the size of '{0}'")]
    UnknownSize(String),

    /// Articles or volumes of an important file are missing
    #[error("Missing articles for '{file}'")]
    MissingSegments {
        /// File whose articles are missing
        file: String,
    },

    /// Segment bytes disagree with what their headers announced
    #[error("Inconsistent segment data: {0}")]
    Stream(String),

    /// The run exceeded its time budget
    #[error("Ingest timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the run
    #[error("Ingest cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Nothing usable was found in the manifest
    #[error("Manifest contains no usable content")]
    NoContent,
}

impl IngestError {
    /// Whether the unit should be queued for another attempt
    ///
    /// Timeouts count as retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Index(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether the error reports missing content
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_not_found(),
            Self::MissingSegments { .. } => true,
            _ => false,
        }
    }

    /// Whether the error only reports cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_cancelled(),
            Self::Cancelled => true,
            _ => false,
        }
    }
}
