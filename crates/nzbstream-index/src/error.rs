//! Error types for index operations

use thiserror::Error;

use crate::model::NodeId;
use crate::range::LongRange;

/// Index operation result type
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors raised by the index model, search and store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Range with `end < start`
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange {
        /// Inclusive start
        start: i64,
        /// Exclusive end
        end: i64,
    },

    /// Offset outside the searchable range
    #[error("Offset {offset} is outside {range}")]
    OffsetOutOfRange {
        /// Requested offset
        offset: i64,
        /// Range that was searched
        range: LongRange,
    },

    /// Lookup returned ranges that are not ordered and contiguous
    #[error("Inconsistent ranges at index {index}: {reason}")]
    InconsistentRanges {
        /// Probed index
        index: usize,
        /// What was wrong
        reason: String,
    },

    /// Part content escapes its segment range
    #[error("Content range {content} is not within segment range {segment}")]
    ContentOutsideSegment {
        /// Content range
        content: LongRange,
        /// Segment range
        segment: LongRange,
    },

    /// Parts do not add up to the node size
    #[error("Parts sum to {actual} bytes but node declares {declared}")]
    SizeMismatch {
        /// Declared node size
        declared: i64,
        /// Sum of part content sizes
        actual: i64,
    },

    /// Part without segments
    #[error("Part {0} has no segments")]
    EmptyPart(usize),

    /// Name already taken under the parent
    #[error("Node '{name}' already exists under {parent}")]
    NodeExists {
        /// Parent directory
        parent: NodeId,
        /// Conflicting name
        name: String,
    },

    /// Parent missing from store and batch
    #[error("Unknown parent node {0}")]
    UnknownParent(NodeId),

    /// Node missing
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// Directories and the root cannot take this operation
    #[error("Node {0} does not support this operation")]
    InvalidNode(NodeId),

    /// Backend failure in a store implementation
    #[error("Index store error: {0}")]
    Store(String),
}

impl IndexError {
    /// Only backend failures may go away on retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
