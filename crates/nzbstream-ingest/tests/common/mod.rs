//! Shared fixtures for ingest integration tests

#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use nzbstream_index::MemoryIndexStore;
use nzbstream_ingest::{
    Article, ArticleHeader, IngestConfig, IngestPipeline, MemoryHistory, NzbFile, NzbSegment,
    SegmentTransport, TransportError, TransportResult,
};
use nzbstream_pool::{AcquireContext, CancellationToken};
use parking_lot::{Mutex, RwLock};
use test_utils::articles::{ArticleMiss, ArticleServer, StoredArticle};

pub type TestPipeline = IngestPipeline<FakeTransport, MemoryIndexStore, MemoryHistory>;

pub fn posted_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

fn to_article(stored: StoredArticle) -> Article {
    Article {
        header: ArticleHeader {
            file_name: Some(stored.file_name),
            file_size: Some(stored.file_size),
            part_offset: Some(stored.part_offset),
            part_size: Some(stored.body.len() as u64),
        },
        date: Some(posted_at()),
        body: Bytes::from(stored.body),
    }
}

fn to_error(id: &str, miss: ArticleMiss) -> TransportError {
    match miss {
        ArticleMiss::NotFound => TransportError::NotFound(id.to_string()),
        ArticleMiss::Transient => {
            TransportError::Transient(format!("connection reset fetching {id}"))
        }
    }
}

/// Article server double
///
/// Every fetch sleeps for a delay derived from the article id, so
/// concurrent fetches finish in an order unrelated to the order they
/// were issued in.
#[derive(Default)]
pub struct FakeTransport {
    server: ArticleServer,
    latency: RwLock<Duration>,
    cancel_on_fetch: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post `data` as articles of `segment_size` bytes with yEnc part headers
    pub fn post(&self, name: &str, data: &[u8], segment_size: usize) -> NzbFile {
        let segments: Vec<NzbSegment> = self
            .server
            .post(name, data, segment_size, true)
            .into_iter()
            .map(|s| NzbSegment {
                id: s.id,
                number: s.number,
                bytes: s.bytes,
            })
            .collect();
        NzbFile {
            subject: format!("[1/1] - \"{name}\" yEnc (1/{})", segments.len()),
            poster: "poster@example.com".into(),
            date: Some(posted_at()),
            segments,
        }
    }

    pub fn remove(&self, id: &str) {
        self.server.remove(id);
    }

    pub fn fail_transiently(&self, id: &str) {
        self.server.fail_transiently(id);
    }

    /// Extra delay added to every request
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Cancel `token` once `count` bodies have been served
    pub fn cancel_after(&self, count: usize, token: CancellationToken) {
        *self.cancel_on_fetch.lock() = Some((count, token));
    }

    pub fn body_fetches(&self) -> usize {
        self.server.body_fetches()
    }

    async fn wait(&self, id: &str, ctx: &AcquireContext) -> TransportResult<()> {
        let jitter = id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        let delay = *self.latency.read() + Duration::from_micros(jitter % 3000);
        ctx.cancel
            .run_until_cancelled(tokio::time::sleep(delay))
            .await
            .ok_or(TransportError::Cancelled)?;
        if ctx.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl SegmentTransport for FakeTransport {
    async fn fetch_article(&self, id: &str, ctx: &AcquireContext) -> TransportResult<Article> {
        self.wait(id, ctx).await?;
        let (stored, served) = self.server.fetch_body(id).map_err(|m| to_error(id, m))?;
        if let Some((count, token)) = &*self.cancel_on_fetch.lock()
            && served >= *count
        {
            token.cancel();
        }
        Ok(to_article(stored))
    }

    async fn fetch_header(&self, id: &str, ctx: &AcquireContext) -> TransportResult<ArticleHeader> {
        self.wait(id, ctx).await?;
        let stored = self.server.get(id).map_err(|m| to_error(id, m))?;
        Ok(to_article(stored).header)
    }

    async fn stat(&self, id: &str, ctx: &AcquireContext) -> TransportResult<bool> {
        self.wait(id, ctx).await?;
        match self.server.get(id) {
            Ok(_) => Ok(true),
            Err(ArticleMiss::NotFound) => Ok(false),
            Err(miss) => Err(to_error(id, miss)),
        }
    }
}

/// Pipeline over a fresh store and history
pub fn pipeline(transport: Arc<FakeTransport>, config: IngestConfig) -> TestPipeline {
    IngestPipeline::new(
        transport,
        Arc::new(MemoryIndexStore::new()),
        Arc::new(MemoryHistory::new()),
        config,
    )
    .expect("valid config")
}

/// Config with small limits suited to tests
pub fn test_config() -> IngestConfig {
    IngestConfig::default().with_connections(6, 2)
}
