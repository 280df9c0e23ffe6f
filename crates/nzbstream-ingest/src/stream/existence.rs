//! Article existence checks

use futures::{StreamExt, TryStreamExt, stream};
use nzbstream_pool::AcquireContext;
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};
use crate::progress::{IngestStage, ProgressReporter};
use crate::transport::SegmentTransport;

/// Evenly spaced sample of `percent` of `ids`, always keeping the last one
pub fn sample_segments(ids: &[String], percent: u8) -> Vec<String> {
    if ids.is_empty() || percent == 0 {
        return Vec::new();
    }
    let percent = usize::from(percent.min(100));
    let count = (ids.len() * percent).div_ceil(100).max(1);
    let mut picked: Vec<usize> = (0..count).map(|i| i * ids.len() / count).collect();
    if picked.last() != Some(&(ids.len() - 1)) {
        picked.push(ids.len() - 1);
    }
    picked.dedup();
    picked.into_iter().map(|i| ids[i].clone()).collect()
}

/// Whether every article in `ids` exists
///
/// Stats run `concurrency` at a time and stop at the first missing article.
pub async fn check_segments_exist<T: SegmentTransport + ?Sized>(
    transport: &T,
    ids: &[String],
    concurrency: usize,
    progress: &ProgressReporter,
    ctx: &AcquireContext,
) -> IngestResult<bool> {
    let total = ids.len();
    let mut checked = 0;
    let mut results = stream::iter(ids)
        .map(move |id| async move { transport.stat(id, ctx).await.map(|found| (id, found)) })
        .buffer_unordered(concurrency.max(1))
        .map_err(IngestError::from);

    while let Some((id, found)) = results.try_next().await? {
        checked += 1;
        progress.report(IngestStage::Verifying, checked, total);
        if !found {
            warn!("Article {} is missing", id);
            return Ok(false);
        }
    }
    debug!("All {} sampled articles exist", total);
    Ok(true)
}
