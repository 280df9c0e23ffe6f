//! Split media files

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use nzbstream_formats::names::{split_mkv_name, split_suffix};
use nzbstream_pool::AcquireContext;
use tracing::debug;

use super::{Extracted, Extractor, SplitMkvFile, Volume};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::probe::ProbedFile;
use crate::stream::resolve_file_size;
use crate::transport::SegmentTransport;

/// Joins `name.mkv.001`, `name.mkv.002`, ... into one file
#[derive(Debug)]
pub struct SplitMkvExtractor<'a, T: ?Sized> {
    transport: &'a T,
    concurrency: usize,
}

/// Pieces without a numeric suffix sort first
fn piece_order(file: &ProbedFile) -> (bool, u32) {
    split_suffix(&file.name).map_or((false, 0), |n| (true, n))
}

impl<'a, T: SegmentTransport + ?Sized> SplitMkvExtractor<'a, T> {
    /// Extractor drawing on `transport`
    pub fn new(transport: &'a T, config: &IngestConfig) -> Self {
        Self {
            transport,
            concurrency: config.background_concurrency(),
        }
    }

    async fn piece(&self, file: &ProbedFile, ctx: &AcquireContext) -> IngestResult<Volume> {
        if file.missing_first_segment {
            return Err(IngestError::MissingSegments {
                file: file.name.clone(),
            });
        }
        let size = resolve_file_size(
            self.transport,
            &file.name,
            &file.segment_ids,
            file.header.as_ref(),
            ctx,
        )
        .await?;
        Ok(Volume {
            name: file.name.clone(),
            segment_ids: file.segment_ids.clone(),
            size,
        })
    }
}

#[async_trait]
impl<T: SegmentTransport + ?Sized> Extractor for SplitMkvExtractor<'_, T> {
    fn name(&self) -> &'static str {
        "split-mkv"
    }

    async fn extract(
        &self,
        files: &[ProbedFile],
        ctx: &AcquireContext,
    ) -> IngestResult<Vec<Extracted>> {
        let mut groups: BTreeMap<String, Vec<&ProbedFile>> = BTreeMap::new();
        for file in files {
            let base = split_mkv_name(&file.name).map_or_else(|| file.name.clone(), |(base, _)| base);
            groups.entry(base).or_default().push(file);
        }

        let mut joined = Vec::with_capacity(groups.len());
        for (name, mut pieces) in groups {
            pieces.sort_by_key(|f| piece_order(f));
            let volumes: Vec<Volume> = stream::iter(pieces.iter().map(|file| self.piece(file, ctx)).collect::<Vec<_>>())
                .buffered(self.concurrency)
                .try_collect()
                .await?;
            debug!("'{}' is split into {} pieces", name, volumes.len());
            joined.push(Extracted::SplitMkv(SplitMkvFile {
                name,
                release_date: pieces.first().map_or_else(Utc::now, |f| f.release_date),
                volumes,
            }));
        }
        Ok(joined)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::probe::probe_files;
    use crate::progress::ProgressReporter;
    use crate::testing::MemoryTransport;
    use nzbstream_pool::CancellationToken;
    use pretty_assertions::assert_eq;
    use test_utils::fake_mkv;

    #[tokio::test]
    async fn test_pieces_join_in_suffix_order() {
        let movie = fake_mkv(5000, 1);
        let transport = MemoryTransport::new();
        let files = vec![
            transport.post("movie.mkv.003", &movie[4000..], 1000),
            transport.post("movie.mkv.001", &movie[..2000], 1000),
            transport.post("movie.mkv.002", &movie[2000..4000], 1000),
        ];
        let ctx = AcquireContext::background(CancellationToken::new(), 1);
        let probed = probe_files(&transport, &files, 16, 2, &ProgressReporter::disabled(), &ctx)
            .await
            .unwrap();

        let extracted = SplitMkvExtractor::new(&transport, &IngestConfig::default())
            .extract(&probed, &ctx)
            .await
            .unwrap();
        let Extracted::SplitMkv(file) = &extracted[0] else {
            unreachable!("split extractor yields joined files");
        };
        assert_eq!(file.name, "movie.mkv");
        let pieces: Vec<_> = file.volumes.iter().map(|v| (v.name.as_str(), v.size)).collect();
        assert_eq!(
            pieces,
            vec![("movie.mkv.001", 2000), ("movie.mkv.002", 2000), ("movie.mkv.003", 1000)]
        );
    }
}
