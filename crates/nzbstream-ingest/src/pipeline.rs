//! Ingest orchestration for one manifest
//!
//! A unit moves from downloading to exactly one of completed, queued or
//! failed. Cancellation by the caller abandons the run without a
//! transition. The index only changes through the single commit at the end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use nzbstream_formats::names::is_video_file;
use nzbstream_index::{IndexStore, NodeId, PendingBatch, find_path};
use nzbstream_pool::{AcquireContext, CancellationToken};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::aggregate::{AggregateOptions, CONTENT_DIR, TreeBuilder, aggregate};
use crate::classify::{FileGroups, classify};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::extract::{
    Extracted, Extractor, RarExtractor, SevenZipExtractor, SplitMkvExtractor, StoredExtractor,
};
use crate::history::{HistoryEntry, HistoryStatus, HistoryStore};
use crate::manifest::Manifest;
use crate::probe::{ProbedFile, probe_files};
use crate::progress::{IngestStage, ProgressReporter};
use crate::stream::{check_segments_exist, sample_segments};
use crate::transport::SegmentTransport;

/// Identity of one ingest job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestUnit {
    /// Stable id, used for history
    pub id: String,
    /// Job name, becomes the directory under the category
    pub name: String,
    /// Category directory under `content`
    pub category: String,
}

impl IngestUnit {
    /// Describe a job
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The job directory already existed; nothing was fetched
    AlreadyCompleted {
        /// Existing job directory
        root: NodeId,
    },
    /// Index written
    Completed {
        /// Job directory
        root: NodeId,
        /// Files indexed
        files: usize,
        /// Run time
        duration: Duration,
    },
    /// Transient failure; try again later
    Queued {
        /// Earliest retry
        retry_at: DateTime<Utc>,
        /// What went wrong
        reason: String,
    },
    /// Permanent failure
    Failed {
        /// What went wrong
        message: String,
    },
    /// Cancelled by the caller; the unit may run again
    Abandoned,
}

struct Staged {
    root: NodeId,
    batch: PendingBatch,
    files: usize,
}

/// Runs manifests through probe, extraction, aggregation and commit
pub struct IngestPipeline<T: ?Sized, S: ?Sized, H: ?Sized> {
    transport: Arc<T>,
    store: Arc<S>,
    history: Arc<H>,
    config: IngestConfig,
}

impl<T, S, H> IngestPipeline<T, S, H>
where
    T: SegmentTransport + ?Sized,
    S: IndexStore + ?Sized,
    H: HistoryStore + ?Sized,
{
    /// Pipeline over the given collaborators
    pub fn new(
        transport: Arc<T>,
        store: Arc<S>,
        history: Arc<H>,
        config: IngestConfig,
    ) -> IngestResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            store,
            history,
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Index the pipeline writes to
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Where finished units are recorded
    pub fn history(&self) -> &Arc<H> {
        &self.history
    }

    /// Ingest `manifest` as `unit`
    ///
    /// Returns `Err` only when even the idempotence lookup fails; every
    /// failure after that is folded into the outcome.
    pub async fn ingest(
        &self,
        manifest: &Manifest,
        unit: &IngestUnit,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> IngestResult<IngestOutcome> {
        let started = Instant::now();
        let path = [CONTENT_DIR, unit.category.as_str(), unit.name.as_str()];
        if let Some(existing) = find_path(&*self.store, &path).await? {
            info!("'{}' is already indexed", unit.name);
            self.record(unit, HistoryStatus::Completed, Some(existing.id), None, started)
                .await;
            return Ok(IngestOutcome::AlreadyCompleted { root: existing.id });
        }

        info!(
            "Ingesting '{}' ({} files) into '{}'",
            unit.name,
            manifest.files.len(),
            unit.category
        );
        let linked = cancel.with_timeout(self.config.ingest_timeout);
        let ctx = AcquireContext::background(linked.token().clone(), self.config.streaming_reserve);

        let staged = match self.stage(manifest, unit, &ctx, progress).await {
            Ok(staged) => staged,
            Err(e) => return Ok(self.settle(e, unit, cancel, &ctx, started).await),
        };
        if ctx.is_cancelled() {
            staged.batch.discard();
            return Ok(self
                .settle(IngestError::Cancelled, unit, cancel, &ctx, started)
                .await);
        }

        progress.report(IngestStage::Committing, 0, 1);
        if let Err(e) = self.store.commit(staged.batch).await {
            return Ok(self.settle(e.into(), unit, cancel, &ctx, started).await);
        }
        progress.report(IngestStage::Committing, 1, 1);

        let duration = started.elapsed();
        info!(
            "Indexed {} files for '{}' in {:?}",
            staged.files, unit.name, duration
        );
        self.record(unit, HistoryStatus::Completed, Some(staged.root), None, started)
            .await;
        Ok(IngestOutcome::Completed {
            root: staged.root,
            files: staged.files,
            duration,
        })
    }

    async fn stage(
        &self,
        manifest: &Manifest,
        unit: &IngestUnit,
        ctx: &AcquireContext,
        progress: &ProgressReporter,
    ) -> IngestResult<Staged> {
        let concurrency = self.config.background_concurrency();
        let probed = probe_files(
            &*self.transport,
            &manifest.files,
            self.config.probe_prefix_bytes,
            concurrency,
            progress,
            ctx,
        )
        .await?;
        let groups = classify(probed);
        if groups.is_empty() {
            return Err(IngestError::NoContent);
        }
        let extracted = self.extract(&groups, manifest, ctx, progress).await?;

        let mut builder = TreeBuilder::start(&*self.store, &unit.category, &unit.name).await?;
        let options = AggregateOptions {
            job_name: unit.name.clone(),
            rename_obfuscated: self.config.rename_obfuscated_single_file,
        };
        if let Err(e) = aggregate(&mut builder, extracted, &options) {
            builder.finish().1.discard();
            return Err(e);
        }
        let files = builder.file_count();
        let (root, batch) = builder.finish();
        if files == 0 {
            batch.discard();
            return Err(IngestError::NoContent);
        }

        if self.config.ensure_article_existence
            && let Err(e) = self.verify(&batch, ctx, progress).await
        {
            batch.discard();
            return Err(e);
        }
        Ok(Staged { root, batch, files })
    }

    async fn extract(
        &self,
        groups: &FileGroups,
        manifest: &Manifest,
        ctx: &AcquireContext,
        progress: &ProgressReporter,
    ) -> IngestResult<Vec<Extracted>> {
        let transport = &*self.transport;
        let stored = StoredExtractor::new(transport, &self.config);
        let rar = RarExtractor::new(transport, &self.config);
        let sevenzip = SevenZipExtractor::new(transport, &self.config)
            .with_password(manifest.metadata.password.as_deref());
        let mkv = SplitMkvExtractor::new(transport, &self.config);

        let work: [(&dyn Extractor, &[ProbedFile]); 4] = [
            (&stored, &groups.stored),
            (&rar, &groups.rar),
            (&sevenzip, &groups.sevenzip),
            (&mkv, &groups.mkv),
        ];
        let mut extracted = Vec::new();
        for (done, (extractor, files)) in work.into_iter().enumerate() {
            if !files.is_empty() {
                debug!("Running {} extractor over {} files", extractor.name(), files.len());
                extracted.extend(extractor.extract(files, ctx).await?);
            }
            progress.report(IngestStage::Extracting, done + 1, 4);
        }
        Ok(extracted)
    }

    /// Sample the articles of every staged video file
    async fn verify(
        &self,
        batch: &PendingBatch,
        ctx: &AcquireContext,
        progress: &ProgressReporter,
    ) -> IngestResult<()> {
        for entry in batch.files() {
            if !is_video_file(&entry.node.name) {
                continue;
            }
            let Some(layout) = &entry.layout else {
                continue;
            };
            let mut ids: Vec<String> = Vec::new();
            for part in &layout.parts {
                for id in &part.segment_ids {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
            }
            let sample = sample_segments(&ids, self.config.article_sample_percent);
            debug!(
                "Checking {} of {} articles of '{}'",
                sample.len(),
                ids.len(),
                entry.node.name
            );
            let found = check_segments_exist(
                &*self.transport,
                &sample,
                self.config.background_concurrency(),
                progress,
                ctx,
            )
            .await?;
            if !found {
                return Err(IngestError::MissingSegments {
                    file: entry.node.name.clone(),
                });
            }
        }
        Ok(())
    }

    async fn settle(
        &self,
        err: IngestError,
        unit: &IngestUnit,
        cancel: &CancellationToken,
        ctx: &AcquireContext,
        started: Instant,
    ) -> IngestOutcome {
        if cancel.is_cancelled() {
            info!("Ingest of '{}' abandoned", unit.name);
            return IngestOutcome::Abandoned;
        }
        let err = if ctx.is_cancelled() || err.is_cancelled() {
            IngestError::Timeout(self.config.ingest_timeout)
        } else {
            err
        };

        if err.is_retryable() {
            let backoff = TimeDelta::from_std(self.config.retry_backoff).unwrap_or(TimeDelta::MAX);
            let retry_at = Utc::now()
                .checked_add_signed(backoff)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            warn!("Ingest of '{}' queued until {}: {}", unit.name, retry_at, err);
            return IngestOutcome::Queued {
                retry_at,
                reason: err.to_string(),
            };
        }

        let message = err.to_string();
        error!("Ingest of '{}' failed: {}", unit.name, message);
        self.record(unit, HistoryStatus::Failed, None, Some(message.clone()), started)
            .await;
        IngestOutcome::Failed { message }
    }

    async fn record(
        &self,
        unit: &IngestUnit,
        status: HistoryStatus,
        root: Option<NodeId>,
        message: Option<String>,
        started: Instant,
    ) {
        let entry = HistoryEntry {
            unit_id: unit.id.clone(),
            name: unit.name.clone(),
            category: unit.category.clone(),
            status,
            root,
            message,
            duration: started.elapsed(),
            finished_at: Utc::now(),
        };
        if let Err(e) = self.history.record(entry).await {
            warn!("Failed to record history for '{}': {}", unit.name, e);
        }
    }
}

impl<T: ?Sized, S: ?Sized, H: ?Sized> std::fmt::Debug for IngestPipeline<T, S, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
