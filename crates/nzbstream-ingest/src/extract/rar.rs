//! RAR volume headers

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use nzbstream_formats::{FormatError, RarVolumeScanner};
use nzbstream_pool::AcquireContext;
use tracing::{debug, info};

use super::{Extracted, Extractor, RarVolumeInfo};
use crate::aggregate::named_rar_volume;
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::probe::ProbedFile;
use crate::stream::{RandomAccess, SegmentStream, resolve_file_size};
use crate::transport::SegmentTransport;

/// Reads the file headers of every RAR volume
///
/// Volumes are scanned independently; joining entries across volumes is
/// left to aggregation. Missing articles fail the extraction. Volumes whose
/// names cannot order them are read to the end block for its volume number.
#[derive(Debug)]
pub struct RarExtractor<'a, T: ?Sized> {
    transport: &'a T,
    concurrency: usize,
    tail_threshold: u64,
    cache_size: usize,
}

impl<'a, T: SegmentTransport + ?Sized> RarExtractor<'a, T> {
    /// Extractor drawing on `transport`
    pub fn new(transport: &'a T, config: &IngestConfig) -> Self {
        Self {
            transport,
            concurrency: config.background_concurrency(),
            tail_threshold: config.rar_tail_threshold,
            cache_size: config.segment_cache_size,
        }
    }

    async fn scan(&self, file: &ProbedFile, ctx: &AcquireContext) -> IngestResult<RarVolumeInfo> {
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
        let stream = SegmentStream::new(
            self.transport,
            file.name.as_str(),
            file.segment_ids.clone(),
            size,
            self.cache_size,
        );

        let named = named_rar_volume(&file.name);
        let tail_threshold = if named.is_some() {
            self.tail_threshold
        } else {
            0
        };
        let mut scanner = RarVolumeScanner::new(stream.len(), tail_threshold);
        while let Some(request) = scanner.next_request() {
            let bytes = stream.read_request(request, ctx).await?;
            scanner.feed(&bytes)?;
        }
        let headers = scanner.finish().ok_or(FormatError::InvalidSignature)?;

        debug!(
            "RAR volume '{}': {:?}, header number {:?}, {} entries",
            file.name,
            headers.version,
            headers.volume_number,
            headers.entries.len()
        );
        Ok(RarVolumeInfo {
            name: file.name.clone(),
            part_number: named.map(|v| v.part_number),
            volume_number: headers.volume_number,
            segment_ids: file.segment_ids.clone(),
            volume_size: size,
            entries: headers.entries,
            release_date: file.release_date,
        })
    }
}

#[async_trait]
impl<T: SegmentTransport + ?Sized> Extractor for RarExtractor<'_, T> {
    fn name(&self) -> &'static str {
        "rar"
    }

    async fn extract(
        &self,
        files: &[ProbedFile],
        ctx: &AcquireContext,
    ) -> IngestResult<Vec<Extracted>> {
        let volumes: Vec<RarVolumeInfo> = stream::iter(files.iter().map(|file| self.scan(file, ctx)).collect::<Vec<_>>())
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        info!("Scanned {} RAR volumes", volumes.len());
        Ok(volumes.into_iter().map(Extracted::RarVolume).collect())
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
    use test_utils::pattern;
    use test_utils::rar::{Rar4Entry, Rar4Volume, Rar5Entry, Rar5Volume};

    fn ctx() -> AcquireContext {
        AcquireContext::background(CancellationToken::new(), 1)
    }

    #[tokio::test]
    async fn test_scans_each_volume() {
        let first = pattern(3000, 1);
        let second = pattern(2000, 2);
        let mut head = Rar4Entry::stored("movie.mkv", 3000, 5000);
        head.split_after = true;
        let mut tail = Rar4Entry::stored("movie.mkv", 2000, 5000);
        tail.split_before = true;

        let transport = MemoryTransport::new();
        let files = vec![
            transport.post(
                "x.part1.rar",
                &Rar4Volume::new().volume_number(Some(0)).more_volumes().file(head, &first).build(),
                700,
            ),
            transport.post(
                "x.part2.rar",
                &Rar4Volume::new().volume_number(Some(1)).file(tail, &second).build(),
                700,
            ),
        ];
        let probed = probe_files(&transport, &files, 16, 2, &ProgressReporter::disabled(), &ctx())
            .await
            .unwrap();

        // RAR4 keeps the volume number in the end block, past the tail threshold
        let config = IngestConfig::default();
        let extracted = RarExtractor::new(&transport, &config)
            .extract(&probed, &ctx())
            .await
            .unwrap();
        let Extracted::RarVolume(quick) = &extracted[1] else {
            unreachable!("rar extractor yields volumes");
        };
        assert_eq!(quick.volume_number, None);

        let config = IngestConfig {
            rar_tail_threshold: 0,
            ..IngestConfig::default()
        };
        let extracted = RarExtractor::new(&transport, &config)
            .extract(&probed, &ctx())
            .await
            .unwrap();
        let volumes: Vec<_> = extracted
            .iter()
            .filter_map(|e| match e {
                Extracted::RarVolume(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].part_number, Some(1));
        assert_eq!(volumes[0].volume_number, Some(0));
        assert_eq!(volumes[1].part_number, Some(2));
        assert_eq!(volumes[1].volume_number, Some(1));
        assert_eq!(volumes[0].entries[0].packed_size, 3000);
        assert!(volumes[0].entries[0].split_after);
        assert!(volumes[1].entries[0].split_before);
    }

    #[tokio::test]
    async fn test_obfuscated_volume_reads_end_block() {
        let mut entry = Rar4Entry::stored("movie.mkv", 3000, 6000);
        entry.split_before = true;
        entry.split_after = true;
        let volume = Rar4Volume::new()
            .volume_number(Some(1))
            .more_volumes()
            .file(entry, &pattern(3000, 5))
            .build();
        let transport = MemoryTransport::new();
        let files = vec![transport.post("c0ffee11d2e3a4b5c6d7e8f9a0b1c2d3", &volume, 700)];
        let probed = probe_files(&transport, &files, 16, 1, &ProgressReporter::disabled(), &ctx())
            .await
            .unwrap();

        let config = IngestConfig::default();
        let extracted = RarExtractor::new(&transport, &config)
            .extract(&probed, &ctx())
            .await
            .unwrap();
        let Extracted::RarVolume(info) = &extracted[0] else {
            unreachable!("rar extractor yields volumes");
        };
        assert_eq!(info.part_number, None);
        assert_eq!(info.volume_number, Some(1));
    }

    #[tokio::test]
    async fn test_rar5_volume_with_service_block() {
        let volume = Rar5Volume::new()
            .file(Rar5Entry::stored("a.mkv", 1500, 1500), &pattern(1500, 3))
            .service("QO", 64)
            .build();
        let transport = MemoryTransport::new();
        let files = vec![transport.post("a.rar", &volume, 500)];
        let probed = probe_files(&transport, &files, 16, 1, &ProgressReporter::disabled(), &ctx())
            .await
            .unwrap();

        let config = IngestConfig::default();
        let extracted = RarExtractor::new(&transport, &config)
            .extract(&probed, &ctx())
            .await
            .unwrap();
        let Extracted::RarVolume(info) = &extracted[0] else {
            unreachable!("rar extractor yields volumes");
        };
        assert_eq!(info.entries.len(), 1);
        assert_eq!(info.entries[0].path, "a.mkv");
        assert_eq!(info.volume_size, volume.len() as u64);
    }

    #[tokio::test]
    async fn test_compressed_entry_is_rejected() {
        let mut entry = Rar4Entry::stored("movie.mkv", 100, 400);
        entry.method = 0x33;
        let volume = Rar4Volume::new().file(entry, &pattern(100, 4)).build();
        let transport = MemoryTransport::new();
        let files = vec![transport.post("movie.rar", &volume, 1000)];
        let probed = probe_files(&transport, &files, 16, 1, &ProgressReporter::disabled(), &ctx())
            .await
            .unwrap();

        let config = IngestConfig::default();
        let err = RarExtractor::new(&transport, &config)
            .extract(&probed, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Format(FormatError::UnsupportedCompression { .. })
        ));
        assert!(!err.is_retryable());
    }
}
