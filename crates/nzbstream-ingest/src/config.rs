//! Ingest configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestError, IngestResult};

/// Tuning for [`crate::IngestPipeline`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Connections the shared pool may open
    pub max_connections: usize,

    /// Pool slots background work leaves free for interactive reads
    ///
    /// Background ingest only acquires a connection while more than this
    /// many slots are available, and runs at most
    /// `max_connections - streaming_reserve` fetches at once.
    pub streaming_reserve: usize,

    /// Bytes of each first segment kept for signature sniffing
    pub probe_prefix_bytes: usize,

    /// A RAR volume walk stops once fewer bytes than this remain
    pub rar_tail_threshold: u64,

    /// Delay before a unit that failed transiently is attempted again
    pub retry_backoff: Duration,

    /// Budget for a whole run, combined with the caller's cancellation
    pub ingest_timeout: Duration,

    /// Check that sampled segments of video files exist before committing
    pub ensure_article_existence: bool,

    /// Share of each video file's segments checked, 0 to 100
    pub article_sample_percent: u8,

    /// Password for encrypted 7z entries when the manifest carries none
    pub archive_password: Option<String>,

    /// Rename the lone file of an archive when its name looks random
    pub rename_obfuscated_single_file: bool,

    /// Decoded segment bodies kept per open stream
    pub segment_cache_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            streaming_reserve: 5,
            probe_prefix_bytes: 16 * 1024,
            rar_tail_threshold: nzbstream_formats::rar::DEFAULT_TAIL_THRESHOLD,
            retry_backoff: Duration::from_secs(10 * 60),
            ingest_timeout: Duration::from_secs(60 * 60),
            ensure_article_existence: false,
            article_sample_percent: 10,
            archive_password: None,
            rename_obfuscated_single_file: true,
            segment_cache_size: 8,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl IngestConfig {
    /// Build from `NZBSTREAM_*` environment variables, falling back to defaults
    ///
    /// Durations are read in seconds.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_parse("NZBSTREAM_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            streaming_reserve: env_parse("NZBSTREAM_STREAMING_RESERVE")
                .unwrap_or(defaults.streaming_reserve),
            probe_prefix_bytes: env_parse("NZBSTREAM_PROBE_PREFIX_BYTES")
                .unwrap_or(defaults.probe_prefix_bytes),
            rar_tail_threshold: env_parse("NZBSTREAM_RAR_TAIL_THRESHOLD")
                .unwrap_or(defaults.rar_tail_threshold),
            retry_backoff: env_parse("NZBSTREAM_RETRY_BACKOFF")
                .map_or(defaults.retry_backoff, Duration::from_secs),
            ingest_timeout: env_parse("NZBSTREAM_INGEST_TIMEOUT")
                .map_or(defaults.ingest_timeout, Duration::from_secs),
            ensure_article_existence: env_parse("NZBSTREAM_ENSURE_ARTICLE_EXISTENCE")
                .unwrap_or(defaults.ensure_article_existence),
            article_sample_percent: env_parse("NZBSTREAM_ARTICLE_SAMPLE_PERCENT")
                .unwrap_or(defaults.article_sample_percent),
            archive_password: std::env::var("NZBSTREAM_ARCHIVE_PASSWORD")
                .ok()
                .filter(|p| !p.is_empty()),
            rename_obfuscated_single_file: env_parse("NZBSTREAM_RENAME_OBFUSCATED")
                .unwrap_or(defaults.rename_obfuscated_single_file),
            segment_cache_size: env_parse("NZBSTREAM_SEGMENT_CACHE_SIZE")
                .unwrap_or(defaults.segment_cache_size),
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> IngestResult<()> {
        if self.max_connections == 0 {
            return Err(IngestError::Config("max_connections must be positive".into()));
        }
        if self.streaming_reserve >= self.max_connections {
            return Err(IngestError::Config(format!(
                "streaming_reserve ({}) must be below max_connections ({})",
                self.streaming_reserve, self.max_connections
            )));
        }
        if self.article_sample_percent > 100 {
            return Err(IngestError::Config(format!(
                "article_sample_percent ({}) exceeds 100",
                self.article_sample_percent
            )));
        }
        if self.probe_prefix_bytes == 0 {
            return Err(IngestError::Config("probe_prefix_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Concurrent fetches a background run may issue
    pub fn background_concurrency(&self) -> usize {
        self.max_connections.saturating_sub(self.streaming_reserve).max(1)
    }

    /// Set the pool size and streaming reserve
    #[must_use]
    pub fn with_connections(mut self, max_connections: usize, streaming_reserve: usize) -> Self {
        self.max_connections = max_connections;
        self.streaming_reserve = streaming_reserve;
        self
    }

    /// Set the archive password
    #[must_use]
    pub fn with_archive_password(mut self, password: impl Into<String>) -> Self {
        self.archive_password = Some(password.into());
        self
    }

    /// Enable the sampled existence check
    #[must_use]
    pub fn with_existence_check(mut self, sample_percent: u8) -> Self {
        self.ensure_article_existence = true;
        self.article_sample_percent = sample_percent;
        self
    }

    /// Set the run timeout
    #[must_use]
    pub fn with_ingest_timeout(mut self, timeout: Duration) -> Self {
        self.ingest_timeout = timeout;
        self
    }
}
