//! First-segment probe of every manifest entry

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use nzbstream_formats::names::is_probably_obfuscated;
use nzbstream_pool::AcquireContext;
use tracing::{debug, info};

use crate::error::IngestResult;
use crate::manifest::NzbFile;
use crate::progress::{IngestStage, ProgressReporter};
use crate::transport::{ArticleHeader, SegmentTransport};

/// What the first article of an entry revealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedFile {
    /// Position of the entry in the manifest
    pub index: usize,
    /// Resolved filename
    pub name: String,
    /// Article ids in segment order
    pub segment_ids: Vec<String>,
    /// Leading bytes of the first article
    pub prefix: Bytes,
    /// Encoding header of the first article
    pub header: Option<ArticleHeader>,
    /// Posting date of the first article, or the probe time
    pub release_date: DateTime<Utc>,
    /// The first article is gone
    pub missing_first_segment: bool,
}

/// Header filename unless it looks random and the subject offers better
fn choose_name(header_name: Option<&str>, hint: String) -> String {
    match header_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) if !is_probably_obfuscated(name) || is_probably_obfuscated(&hint) => {
            name.to_string()
        }
        _ => hint,
    }
}

async fn probe_one<T: SegmentTransport + ?Sized>(
    transport: &T,
    index: usize,
    file: &NzbFile,
    prefix_bytes: usize,
    ctx: &AcquireContext,
) -> IngestResult<Option<ProbedFile>> {
    let segment_ids = file.segment_ids();
    let Some(first) = segment_ids.first() else {
        return Ok(None);
    };
    let hint = file.file_name_hint();

    match transport.fetch_article(first, ctx).await {
        Ok(article) => {
            let prefix = article.body.slice(..prefix_bytes.min(article.body.len()));
            Ok(Some(ProbedFile {
                index,
                name: choose_name(article.header.file_name.as_deref(), hint),
                segment_ids,
                prefix,
                header: Some(article.header),
                release_date: article.date.unwrap_or_else(Utc::now),
                missing_first_segment: false,
            }))
        }
        Err(e) if e.is_not_found() => {
            debug!("First segment of '{}' is missing", hint);
            Ok(Some(ProbedFile {
                index,
                name: hint,
                segment_ids,
                prefix: Bytes::new(),
                header: None,
                release_date: Utc::now(),
                missing_first_segment: true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch the first article of every non-empty entry
///
/// Runs `concurrency` fetches at a time; results come back in manifest
/// order whatever order the fetches finish in.
pub async fn probe_files<T: SegmentTransport + ?Sized>(
    transport: &T,
    files: &[NzbFile],
    prefix_bytes: usize,
    concurrency: usize,
    progress: &ProgressReporter,
    ctx: &AcquireContext,
) -> IngestResult<Vec<ProbedFile>> {
    let total = files.len();
    let mut probes = stream::iter(files.iter().enumerate())
        .map(move |(index, file)| probe_one(transport, index, file, prefix_bytes, ctx))
        .buffer_unordered(concurrency.max(1));

    let mut probed = Vec::with_capacity(total);
    let mut done = 0;
    while let Some(result) = probes.next().await {
        if let Some(file) = result? {
            probed.push(file);
        }
        done += 1;
        progress.report(IngestStage::Probing, done, total);
    }
    probed.sort_by_key(|p| p.index);

    let missing = probed.iter().filter(|p| p.missing_first_segment).count();
    info!(
        "Probed {} files ({} missing their first segment)",
        probed.len(),
        missing
    );
    Ok(probed)
}
