//! Seekable stream over the articles of one manifest entry

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use nzbstream_index::LongRange;
use nzbstream_index::search::find_async;
use nzbstream_pool::AcquireContext;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::RandomAccess;
use crate::error::{IngestError, IngestResult};
use crate::transport::{ArticleHeader, SegmentTransport};

fn part_range(header: &ArticleHeader) -> IngestResult<Option<LongRange>> {
    match (header.part_offset, header.part_size) {
        (Some(offset), Some(size)) => Ok(Some(LongRange::from_size(offset as i64, size as i64)?)),
        _ => Ok(None),
    }
}

/// File of known size spread over an ordered list of articles
///
/// Offsets are mapped to articles with an interpolation search whose
/// lookups read each article's `=ypart` header. Articles without part
/// metadata are assumed to share the size of the first one. Recently
/// decoded bodies are kept so that consecutive header reads hit the
/// network once.
pub struct SegmentStream<'a, T: SegmentTransport + ?Sized> {
    transport: &'a T,
    name: String,
    segment_ids: Vec<String>,
    len: u64,
    ranges: DashMap<usize, LongRange>,
    bodies: Mutex<VecDeque<(usize, Bytes)>>,
    cache_size: usize,
}

impl<'a, T: SegmentTransport + ?Sized> SegmentStream<'a, T> {
    /// Stream over `segment_ids` holding `len` bytes in total
    pub fn new(
        transport: &'a T,
        name: impl Into<String>,
        segment_ids: Vec<String>,
        len: u64,
        cache_size: usize,
    ) -> Self {
        Self {
            transport,
            name: name.into(),
            segment_ids,
            len,
            ranges: DashMap::new(),
            bodies: Mutex::new(VecDeque::new()),
            cache_size: cache_size.max(1),
        }
    }

    /// Name used in errors and logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Articles backing the stream, in order
    pub fn segment_ids(&self) -> &[String] {
        &self.segment_ids
    }

    fn segment_id(&self, index: usize) -> IngestResult<&str> {
        self.segment_ids
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| IngestError::Stream(format!("'{}' has no segment {}", self.name, index)))
    }

    fn cached_body(&self, index: usize) -> Option<Bytes> {
        let mut bodies = self.bodies.lock();
        let position = bodies.iter().position(|(i, _)| *i == index)?;
        let entry = bodies.remove(position)?;
        let body = entry.1.clone();
        bodies.push_back(entry);
        Some(body)
    }

    fn remember(&self, index: usize, body: Bytes) {
        let mut bodies = self.bodies.lock();
        bodies.retain(|(i, _)| *i != index);
        bodies.push_back((index, body));
        while bodies.len() > self.cache_size {
            bodies.pop_front();
        }
    }

    async fn body(&self, index: usize, ctx: &AcquireContext) -> IngestResult<Bytes> {
        if let Some(body) = self.cached_body(index) {
            return Ok(body);
        }
        let id = self.segment_id(index)?;
        trace!("Fetching segment {} of '{}'", index, self.name);
        let article = self.transport.fetch_article(id, ctx).await?;
        if let Some(range) = part_range(&article.header)? {
            self.ranges.insert(index, range);
        }
        self.remember(index, article.body.clone());
        Ok(article.body)
    }

    async fn uniform_range(&self, index: usize, ctx: &AcquireContext) -> IngestResult<LongRange> {
        let first = self.body(0, ctx).await?.len() as u64;
        if first == 0 {
            return Err(IngestError::Stream(format!(
                "first segment of '{}' is empty",
                self.name
            )));
        }
        let start = first.saturating_mul(index as u64).min(self.len);
        let end = if index + 1 == self.segment_ids.len() {
            self.len
        } else {
            start.saturating_add(first).min(self.len)
        };
        Ok(LongRange::new(start as i64, end as i64)?)
    }

    async fn segment_range(&self, index: usize, ctx: &AcquireContext) -> IngestResult<LongRange> {
        if let Some(range) = self.ranges.get(&index).map(|r| *r) {
            return Ok(range);
        }
        let header = self
            .transport
            .fetch_header(self.segment_id(index)?, ctx)
            .await?;
        let range = match part_range(&header)? {
            Some(range) => range,
            None => {
                debug!(
                    "Segment {} of '{}' has no part header, assuming uniform sizes",
                    index, self.name
                );
                self.uniform_range(index, ctx).await?
            }
        };
        self.ranges.insert(index, range);
        Ok(range)
    }
}

#[async_trait]
impl<T: SegmentTransport + ?Sized> RandomAccess for SegmentStream<'_, T> {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, offset: u64, len: usize, ctx: &AcquireContext) -> IngestResult<Bytes> {
        let end = offset.saturating_add(len as u64).min(self.len);
        if offset >= end {
            return Ok(Bytes::new());
        }
        let total = LongRange::from_len(self.len as i64)?;
        let count = self.segment_ids.len();

        let mut out = BytesMut::with_capacity((end - offset) as usize);
        let mut position = offset;
        while position < end {
            let index = find_async(position as i64, 0..count, total, move |i| {
                self.segment_range(i, ctx)
            })
            .await?;
            let range = self.segment_range(index, ctx).await?;
            let body = self.body(index, ctx).await?;

            let from = (position as i64 - range.start) as usize;
            let to = (end.min(range.end as u64) as i64 - range.start) as usize;
            let slice = body.get(from..to).filter(|s| !s.is_empty()).ok_or_else(|| {
                IngestError::Stream(format!(
                    "segment {} of '{}' holds {} bytes, header announced {}",
                    index,
                    self.name,
                    body.len(),
                    range.count()
                ))
            })?;
            out.extend_from_slice(slice);
            position += slice.len() as u64;
        }
        Ok(out.freeze())
    }
}

impl<T: SegmentTransport + ?Sized> std::fmt::Debug for SegmentStream<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStream")
            .field("name", &self.name)
            .field("segments", &self.segment_ids.len())
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Size of a file from its article headers
///
/// Uses the `=ybegin size` of the first article when known, otherwise the
/// last article's part header.
pub async fn resolve_file_size<T: SegmentTransport + ?Sized>(
    transport: &T,
    name: &str,
    segment_ids: &[String],
    first_header: Option<&ArticleHeader>,
    ctx: &AcquireContext,
) -> IngestResult<u64> {
    if let Some(size) = first_header.and_then(|h| h.file_size) {
        return Ok(size);
    }
    let last = segment_ids
        .last()
        .ok_or_else(|| IngestError::UnknownSize(name.to_string()))?;
    let header = transport.fetch_header(last, ctx).await?;
    match header {
        ArticleHeader {
            file_size: Some(size),
            ..
        } => Ok(size),
        ArticleHeader {
            part_offset: Some(offset),
            part_size: Some(size),
            ..
        } => Ok(offset + size),
        _ => Err(IngestError::UnknownSize(name.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;
    use nzbstream_pool::CancellationToken;
    use pretty_assertions::assert_eq;
    use test_utils::pattern;

    fn ctx() -> AcquireContext {
        AcquireContext::foreground(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_read_across_segments() {
        let data = pattern(2500, 1);
        let transport = MemoryTransport::new();
        let file = transport.post("movie.mkv", &data, 1000);
        let stream = SegmentStream::new(&transport, "movie.mkv", file.segment_ids(), 2500, 4);

        let bytes = stream.read_at(900, 1200, &ctx()).await.unwrap();
        assert_eq!(&bytes[..], &data[900..2100]);

        let tail = stream.read_at(2400, 500, &ctx()).await.unwrap();
        assert_eq!(&tail[..], &data[2400..]);
        assert!(stream.read_at(2500, 10, &ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cached_bodies_are_not_refetched() {
        let data = pattern(3000, 2);
        let transport = MemoryTransport::new();
        let file = transport.post("a.bin", &data, 1000);
        let stream = SegmentStream::new(&transport, "a.bin", file.segment_ids(), 3000, 4);

        stream.read_at(1100, 10, &ctx()).await.unwrap();
        let after_first = transport.body_fetches();
        stream.read_at(1200, 10, &ctx()).await.unwrap();
        assert_eq!(transport.body_fetches(), after_first);
    }

    #[tokio::test]
    async fn test_uniform_fallback_without_part_headers() {
        let data = pattern(2300, 3);
        let transport = MemoryTransport::new();
        let file = transport.post_bare("bare.bin", &data, 1000);
        let stream = SegmentStream::new(&transport, "bare.bin", file.segment_ids(), 2300, 2);

        let bytes = stream.read_at(1990, 300, &ctx()).await.unwrap();
        assert_eq!(&bytes[..], &data[1990..2290]);
    }

    #[tokio::test]
    async fn test_short_body_is_an_error() {
        let data = pattern(2000, 4);
        let transport = MemoryTransport::new();
        let file = transport.post("short.bin", &data, 1000);
        // Claim more bytes than the articles hold
        let stream = SegmentStream::new(&transport, "short.bin", file.segment_ids(), 2100, 2);
        let err = stream.read_at(1900, 200, &ctx()).await.unwrap_err();
        assert!(matches!(err, IngestError::Index(_) | IngestError::Stream(_)));
    }

    #[tokio::test]
    async fn test_resolve_file_size() {
        let data = pattern(2500, 5);
        let transport = MemoryTransport::new();
        let file = transport.post("a.bin", &data, 1000);
        let ids = file.segment_ids();

        let header = ArticleHeader {
            file_size: Some(42),
            ..ArticleHeader::default()
        };
        let size = resolve_file_size(&transport, "a.bin", &ids, Some(&header), &ctx())
            .await
            .unwrap();
        assert_eq!(size, 42);

        let size = resolve_file_size(&transport, "a.bin", &ids, None, &ctx())
            .await
            .unwrap();
        assert_eq!(size, 2500);

        let bare = transport.post_bare("b.bin", &data, 1000);
        let err = resolve_file_size(&transport, "b.bin", &bare.segment_ids(), None, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownSize(name) if name == "b.bin"));
    }
}
