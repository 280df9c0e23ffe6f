//! In-memory transport shared by unit tests

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use nzbstream_pool::AcquireContext;
use test_utils::articles::{ArticleMiss, ArticleServer, PostedSegment, StoredArticle};

use crate::error::{TransportError, TransportResult};
use crate::manifest::{NzbFile, NzbSegment};
use crate::transport::{Article, ArticleHeader, SegmentTransport};

pub(crate) fn posted_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// Article as the transport layer returns it
pub(crate) fn to_article(stored: StoredArticle) -> Article {
    let header = if stored.has_part_header {
        ArticleHeader {
            file_name: Some(stored.file_name),
            file_size: Some(stored.file_size),
            part_offset: Some(stored.part_offset),
            part_size: Some(stored.body.len() as u64),
        }
    } else {
        ArticleHeader::default()
    };
    Article {
        header,
        date: Some(posted_at()),
        body: Bytes::from(stored.body),
    }
}

pub(crate) fn to_error(id: &str, miss: ArticleMiss) -> TransportError {
    match miss {
        ArticleMiss::NotFound => TransportError::NotFound(id.to_string()),
        ArticleMiss::Transient => {
            TransportError::Transient(format!("connection reset fetching {id}"))
        }
    }
}

fn manifest_file(name: &str, segments: Vec<PostedSegment>) -> NzbFile {
    NzbFile {
        subject: format!("\"{name}\" yEnc (1/{})", segments.len()),
        poster: "poster@example.com".into(),
        date: Some(posted_at()),
        segments: segments
            .into_iter()
            .map(|s| NzbSegment {
                id: s.id,
                number: s.number,
                bytes: s.bytes,
            })
            .collect(),
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryTransport {
    server: ArticleServer,
}

impl MemoryTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Post `data` as yEnc articles carrying part headers
    pub(crate) fn post(&self, name: &str, data: &[u8], segment_size: usize) -> NzbFile {
        manifest_file(name, self.server.post(name, data, segment_size, true))
    }

    /// Post `data` as articles without any header metadata
    pub(crate) fn post_bare(&self, name: &str, data: &[u8], segment_size: usize) -> NzbFile {
        manifest_file(name, self.server.post(name, data, segment_size, false))
    }

    pub(crate) fn remove(&self, id: &str) {
        self.server.remove(id);
    }

    pub(crate) fn fail_transiently(&self, id: &str) {
        self.server.fail_transiently(id);
    }

    pub(crate) fn body_fetches(&self) -> usize {
        self.server.body_fetches()
    }

    fn check(ctx: &AcquireContext) -> TransportResult<()> {
        if ctx.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl SegmentTransport for MemoryTransport {
    async fn fetch_article(&self, id: &str, ctx: &AcquireContext) -> TransportResult<Article> {
        Self::check(ctx)?;
        let (stored, _) = self.server.fetch_body(id).map_err(|m| to_error(id, m))?;
        Ok(to_article(stored))
    }

    async fn fetch_header(&self, id: &str, ctx: &AcquireContext) -> TransportResult<ArticleHeader> {
        Self::check(ctx)?;
        let stored = self.server.get(id).map_err(|m| to_error(id, m))?;
        Ok(to_article(stored).header)
    }

    async fn stat(&self, id: &str, ctx: &AcquireContext) -> TransportResult<bool> {
        Self::check(ctx)?;
        match self.server.get(id) {
            Ok(_) => Ok(true),
            Err(ArticleMiss::NotFound) => Ok(false),
            Err(miss) => Err(to_error(id, miss)),
        }
    }
}
