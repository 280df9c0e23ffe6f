//! Half-open byte ranges

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IndexError, IndexResult};

/// `[start, end)` over the signed 64-bit domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LongRange {
    /// Inclusive start
    pub start: i64,
    /// Exclusive end
    pub end: i64,
}

impl LongRange {
    /// Create a range, rejecting `end < start`
    pub fn new(start: i64, end: i64) -> IndexResult<Self> {
        if end < start {
            return Err(IndexError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Create `[start, start + size)`
    pub fn from_size(start: i64, size: i64) -> IndexResult<Self> {
        Self::new(start, start.saturating_add(size))
    }

    /// Create `[0, size)`
    pub fn from_len(size: i64) -> IndexResult<Self> {
        Self::from_size(0, size)
    }

    /// Number of bytes covered
    pub fn count(&self) -> i64 {
        self.end - self.start
    }

    /// Whether the range covers no bytes
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Whether `offset` lies inside the range
    pub fn contains(&self, offset: i64) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Whether `other` lies fully inside this range
    pub fn contains_range(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Move both bounds by `delta`
    #[must_use]
    pub fn shift(&self, delta: i64) -> Self {
        Self {
            start: self.start + delta,
            end: self.end + delta,
        }
    }

    /// Overlap with `other`, if any bytes are shared
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Self { start, end })
    }
}

impl fmt::Display for LongRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
