//! Article transport seam
//!
//! [`SegmentTransport`] is what the pipeline and its streams fetch through.
//! [`PooledTransport`] implements it on top of the shared connection pool
//! and admission gate; tests substitute in-memory transports.

mod pooled;

pub use pooled::PooledTransport;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use nzbstream_pool::AcquireContext;

use crate::error::TransportResult;

/// Metadata carried by a yEnc-encoded article (`=ybegin` / `=ypart`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleHeader {
    /// Original filename
    pub file_name: Option<String>,
    /// Size of the whole file
    pub file_size: Option<u64>,
    /// 0-based offset of this article's bytes within the file
    pub part_offset: Option<u64>,
    /// Decoded bytes in this article
    pub part_size: Option<u64>,
}

/// Decoded article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// Encoding header metadata
    pub header: ArticleHeader,
    /// Posting date
    pub date: Option<DateTime<Utc>>,
    /// Decoded body
    pub body: Bytes,
}

/// Fetches articles on behalf of a caller's context
#[async_trait]
pub trait SegmentTransport: Send + Sync {
    /// Fetch and decode an article
    async fn fetch_article(&self, id: &str, ctx: &AcquireContext) -> TransportResult<Article>;

    /// Fetch only the encoding header of an article
    async fn fetch_header(&self, id: &str, ctx: &AcquireContext) -> TransportResult<ArticleHeader> {
        Ok(self.fetch_article(id, ctx).await?.header)
    }

    /// Whether the article exists on the server
    async fn stat(&self, id: &str, ctx: &AcquireContext) -> TransportResult<bool>;
}

/// One live server connection
#[async_trait]
pub trait ArticleConnection: Send {
    /// Fetch and decode an article body
    async fn body(&mut self, id: &str) -> TransportResult<Article>;

    /// Check that an article exists
    async fn stat(&mut self, id: &str) -> TransportResult<bool>;
}
