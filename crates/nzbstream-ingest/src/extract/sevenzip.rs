//! 7z sets

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use nzbstream_formats::names::sevenzip_volume_name;
use nzbstream_formats::{SevenZipScanner, StorageMethod, derive_decryption_params};
use nzbstream_pool::AcquireContext;
use tracing::{debug, info};

use super::{Extracted, Extractor, SevenZipFile, SevenZipSet, Volume};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::probe::ProbedFile;
use crate::stream::{ConcatStream, RandomAccess, SegmentStream, resolve_file_size};
use crate::transport::SegmentTransport;

/// Maps the files of each 7z set onto its concatenated volumes
#[derive(Debug)]
pub struct SevenZipExtractor<'a, T: ?Sized> {
    transport: &'a T,
    concurrency: usize,
    cache_size: usize,
    password: Option<String>,
}

fn group_sets(files: &[ProbedFile]) -> BTreeMap<String, Vec<(u32, &ProbedFile)>> {
    let mut sets: BTreeMap<String, Vec<(u32, &ProbedFile)>> = BTreeMap::new();
    for file in files {
        let (archive, volume) = sevenzip_volume_name(&file.name)
            .map_or_else(|| (file.name.clone(), 0), |v| (v.archive, v.volume));
        sets.entry(archive).or_default().push((volume, file));
    }
    for volumes in sets.values_mut() {
        volumes.sort_by_key(|(number, _)| *number);
    }
    sets
}

impl<'a, T: SegmentTransport + ?Sized> SevenZipExtractor<'a, T> {
    /// Extractor drawing on `transport`, using the configured password
    pub fn new(transport: &'a T, config: &IngestConfig) -> Self {
        Self {
            transport,
            concurrency: config.background_concurrency(),
            cache_size: config.segment_cache_size,
            password: config.archive_password.clone(),
        }
    }

    /// Prefer `password` over the configured one when given
    #[must_use]
    pub fn with_password(mut self, password: Option<&str>) -> Self {
        if let Some(password) = password {
            self.password = Some(password.to_string());
        }
        self
    }

    async fn volume(&self, file: &ProbedFile, ctx: &AcquireContext) -> IngestResult<Volume> {
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

    async fn read_set(
        &self,
        archive: String,
        files_of_set: Vec<&ProbedFile>,
        ctx: &AcquireContext,
    ) -> IngestResult<SevenZipSet> {
        let volumes: Vec<Volume> = stream::iter(files_of_set.iter().map(|file| self.volume(file, ctx)).collect::<Vec<_>>())
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let streams = volumes
            .iter()
            .map(|v| {
                SegmentStream::new(
                    self.transport,
                    v.name.as_str(),
                    v.segment_ids.clone(),
                    v.size,
                    self.cache_size,
                )
            })
            .collect();
        let joined = ConcatStream::new(streams)?;

        let mut scanner = SevenZipScanner::new(joined.len());
        while let Some(request) = scanner.next_request() {
            let bytes = joined.read_request(request, ctx).await?;
            scanner.feed(&bytes)?;
        }

        let password = self.password.as_deref();
        let files = scanner
            .finish()?
            .into_iter()
            .map(|entry| -> IngestResult<SevenZipFile> {
                let decryption = match (entry.method, &entry.aes_properties) {
                    (StorageMethod::Aes, Some(props)) => Some(derive_decryption_params(
                        &entry.path,
                        props,
                        password,
                        entry.size,
                    )?),
                    _ => None,
                };
                Ok(SevenZipFile {
                    path: entry.path,
                    range: entry.range,
                    size: entry.size,
                    is_directory: entry.is_directory,
                    decryption,
                })
            })
            .collect::<IngestResult<Vec<_>>>()?;
        let release_date = files_of_set
            .first()
            .map_or_else(Utc::now, |f| f.release_date);

        debug!(
            "7z set '{}' spans {} volumes and lists {} entries",
            archive,
            volumes.len(),
            files.len()
        );
        Ok(SevenZipSet {
            archive,
            volumes,
            files,
            release_date,
        })
    }
}

#[async_trait]
impl<T: SegmentTransport + ?Sized> Extractor for SevenZipExtractor<'_, T> {
    fn name(&self) -> &'static str {
        "7z"
    }

    async fn extract(
        &self,
        files: &[ProbedFile],
        ctx: &AcquireContext,
    ) -> IngestResult<Vec<Extracted>> {
        let mut sets = Vec::new();
        for (archive, volumes) in group_sets(files) {
            let members = volumes.into_iter().map(|(_, f)| f).collect();
            let set = self.read_set(archive, members, ctx).await?;
            sets.push(Extracted::SevenZip(set));
        }
        info!("Read {} 7z sets", sets.len());
        Ok(sets)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::probe::probe_files;
    use crate::progress::ProgressReporter;
    use crate::testing::MemoryTransport;
    use nzbstream_formats::FormatError;
    use nzbstream_pool::CancellationToken;
    use pretty_assertions::assert_eq;
    use test_utils::sevenzip::SevenZipBuilder;
    use test_utils::{fake_mkv, pattern};

    fn ctx() -> AcquireContext {
        AcquireContext::background(CancellationToken::new(), 1)
    }

    async fn extract_with(
        transport: &MemoryTransport,
        files: &[crate::manifest::NzbFile],
        config: &IngestConfig,
    ) -> IngestResult<Vec<Extracted>> {
        let probed = probe_files(transport, files, 16, 2, &ProgressReporter::disabled(), &ctx())
            .await
            .unwrap();
        SevenZipExtractor::new(transport, config)
            .extract(&probed, &ctx())
            .await
    }

    #[test]
    fn test_group_sets_orders_volumes() {
        let file = |name: &str| ProbedFile {
            index: 0,
            name: name.to_string(),
            segment_ids: Vec::new(),
            prefix: bytes::Bytes::new(),
            header: None,
            release_date: Utc::now(),
            missing_first_segment: false,
        };
        let files = vec![file("a.7z.002"), file("b.7z"), file("a.7z.001"), file("odd.bin")];
        let sets = group_sets(&files);
        let a: Vec<_> = sets["a"].iter().map(|(n, f)| (*n, f.name.as_str())).collect();
        assert_eq!(a, vec![(1, "a.7z.001"), (2, "a.7z.002")]);
        assert_eq!(sets["b"].len(), 1);
        assert_eq!(sets["odd.bin"][0].0, 0);
    }

    #[tokio::test]
    async fn test_set_across_volumes() {
        let movie = fake_mkv(6000, 1);
        let archive = SevenZipBuilder::new()
            .file("Movie/movie.mkv", &movie)
            .file("Movie/movie.nfo", b"nfo")
            .encode_header()
            .build();
        let (first, second) = archive.split_at(4000);

        let transport = MemoryTransport::new();
        let files = vec![
            transport.post("rel.7z.001", first, 1500),
            transport.post("rel.7z.002", second, 1500),
        ];
        let extracted = extract_with(&transport, &files, &IngestConfig::default())
            .await
            .unwrap();
        assert_eq!(extracted.len(), 1);
        let Extracted::SevenZip(set) = &extracted[0] else {
            unreachable!("7z extractor yields sets");
        };
        assert_eq!(set.archive, "rel");
        assert_eq!(set.volumes.iter().map(|v| v.size).sum::<u64>(), archive.len() as u64);
        assert_eq!(set.files[0].path, "Movie/movie.mkv");
        assert_eq!(set.files[0].range.start, 32);
        assert_eq!(set.files[0].size, 6000);
        assert_eq!(set.files[1].range.start, 32 + 6000);
        assert!(set.files.iter().all(|f| f.decryption.is_none()));
    }

    #[tokio::test]
    async fn test_encrypted_entry_needs_password() {
        let mut props = vec![0xC0 | 4, 0x0F, 0xAA];
        props.extend(1..=16u8);
        let archive = SevenZipBuilder::new()
            .encrypted_file("secret.mkv", &pattern(1024, 2), &props)
            .build();
        let transport = MemoryTransport::new();
        let files = vec![transport.post("secret.7z", &archive, 1000)];

        let err = extract_with(&transport, &files, &IngestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Format(FormatError::PasswordProtected(_))));

        let config = IngestConfig::default().with_archive_password("hunter2");
        let extracted = extract_with(&transport, &files, &config).await.unwrap();
        let Extracted::SevenZip(set) = &extracted[0] else {
            unreachable!("7z extractor yields sets");
        };
        let params = set.files[0].decryption.as_ref().unwrap();
        assert_eq!(params.decoded_size(), 1024);
        assert_eq!(params.iv()[..2], [1, 2]);
    }

    #[tokio::test]
    async fn test_compressed_entry_is_rejected() {
        let archive = SevenZipBuilder::new()
            .lzma_file("movie.mkv", &pattern(2000, 3))
            .build();
        let transport = MemoryTransport::new();
        let files = vec![transport.post("movie.7z", &archive, 1000)];

        let err = extract_with(&transport, &files, &IngestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Format(FormatError::UnsupportedCompression { .. })
        ));
    }
}
