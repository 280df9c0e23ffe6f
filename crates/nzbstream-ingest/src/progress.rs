//! Best-effort progress events

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Pipeline stage a progress event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Fetching first segments
    Probing,
    /// Walking archive headers and resolving sizes
    Extracting,
    /// Sampling segments of important files
    Verifying,
    /// Writing the index
    Committing,
}

/// One progress update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestProgress {
    /// Unit the update belongs to
    pub unit: String,
    /// Current stage
    pub stage: IngestStage,
    /// Completion of the stage, 0 to 100
    pub percent: u8,
}

/// Sender side of a progress channel
///
/// Delivery never blocks and never fails the run: a full or closed channel
/// just drops the update.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    unit: String,
    sender: Option<mpsc::Sender<IngestProgress>>,
}

impl ProgressReporter {
    /// Reporter delivering to `sender`
    pub fn new(unit: impl Into<String>, sender: mpsc::Sender<IngestProgress>) -> Self {
        Self {
            unit: unit.into(),
            sender: Some(sender),
        }
    }

    /// Reporter that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Report `done` of `total` steps of `stage`
    pub fn report(&self, stage: IngestStage, done: usize, total: usize) {
        let Some(sender) = &self.sender else {
            return;
        };
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        let event = IngestProgress {
            unit: self.unit.clone(),
            stage,
            percent,
        };
        if let Err(e) = sender.try_send(event) {
            debug!("Dropping progress update for {}: {}", self.unit, e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_percent() {
        let (tx, mut rx) = mpsc::channel(4);
        let reporter = ProgressReporter::new("unit-1", tx);
        reporter.report(IngestStage::Probing, 1, 4);
        reporter.report(IngestStage::Committing, 0, 0);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.percent, 25);
        assert_eq!(first.unit, "unit-1");
        assert_eq!(rx.recv().await.unwrap().percent, 100);
    }

    #[tokio::test]
    async fn test_full_or_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        let reporter = ProgressReporter::new("unit-1", tx);
        reporter.report(IngestStage::Probing, 1, 2);
        reporter.report(IngestStage::Probing, 2, 2);
        drop(rx);
        reporter.report(IngestStage::Extracting, 1, 1);
        ProgressReporter::disabled().report(IngestStage::Verifying, 1, 1);
    }
}
