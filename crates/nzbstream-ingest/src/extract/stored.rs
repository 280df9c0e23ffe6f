//! Plain files

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use nzbstream_formats::names::is_video_file;
use nzbstream_pool::AcquireContext;
use tracing::{debug, warn};

use super::{Extracted, Extractor, StoredFile};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::probe::ProbedFile;
use crate::stream::resolve_file_size;
use crate::transport::SegmentTransport;

/// Indexes files that are not part of any container
///
/// Files whose articles are gone are dropped unless they are video, in
/// which case the whole ingest fails.
#[derive(Debug)]
pub struct StoredExtractor<'a, T: ?Sized> {
    transport: &'a T,
    concurrency: usize,
}

impl<'a, T: SegmentTransport + ?Sized> StoredExtractor<'a, T> {
    /// Extractor drawing on `transport`
    pub fn new(transport: &'a T, config: &IngestConfig) -> Self {
        Self {
            transport,
            concurrency: config.background_concurrency(),
        }
    }

    async fn stored(
        &self,
        file: &ProbedFile,
        ctx: &AcquireContext,
    ) -> IngestResult<Option<StoredFile>> {
        let video = is_video_file(&file.name);
        if file.missing_first_segment {
            if video {
                return Err(IngestError::MissingSegments {
                    file: file.name.clone(),
                });
            }
            warn!("Skipping '{}': first article is missing", file.name);
            return Ok(None);
        }

        let size = match resolve_file_size(
            self.transport,
            &file.name,
            &file.segment_ids,
            file.header.as_ref(),
            ctx,
        )
        .await
        {
            Ok(size) => size,
            Err(e) if e.is_not_found() && !video => {
                warn!("Skipping '{}': {}", file.name, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        debug!("Stored file '{}' holds {} bytes", file.name, size);
        Ok(Some(StoredFile {
            name: file.name.clone(),
            segment_ids: file.segment_ids.clone(),
            size,
            release_date: file.release_date,
        }))
    }
}

#[async_trait]
impl<T: SegmentTransport + ?Sized> Extractor for StoredExtractor<'_, T> {
    fn name(&self) -> &'static str {
        "stored"
    }

    async fn extract(
        &self,
        files: &[ProbedFile],
        ctx: &AcquireContext,
    ) -> IngestResult<Vec<Extracted>> {
        let found: Vec<Option<StoredFile>> = stream::iter(files.iter().map(|file| self.stored(file, ctx)).collect::<Vec<_>>())
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        Ok(found.into_iter().flatten().map(Extracted::Stored).collect())
    }
}
