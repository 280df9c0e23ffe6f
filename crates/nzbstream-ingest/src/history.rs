//! Completed and failed unit records

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nzbstream_index::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::IngestResult;

/// Terminal state of a recorded unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    /// Index written
    Completed,
    /// Given up on
    Failed,
}

/// One finished unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unit identity
    pub unit_id: String,
    /// Job name
    pub name: String,
    /// Category
    pub category: String,
    /// Outcome
    pub status: HistoryStatus,
    /// Root directory created for the unit
    pub root: Option<NodeId>,
    /// Human-readable failure
    pub message: Option<String>,
    /// Time spent on the run
    pub duration: Duration,
    /// When the run ended
    pub finished_at: DateTime<Utc>,
}

/// Where finished units are recorded
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record
    async fn record(&self, entry: HistoryEntry) -> IngestResult<()>;

    /// Records for a unit, oldest first
    async fn entries_for(&self, unit_id: &str) -> IngestResult<Vec<HistoryEntry>>;
}

/// In-memory history
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    /// Empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first
    pub fn all(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn record(&self, entry: HistoryEntry) -> IngestResult<()> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn entries_for(&self, unit_id: &str) -> IngestResult<Vec<HistoryEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.unit_id == unit_id)
            .cloned()
            .collect())
    }
}
