//! Several volumes read as one range

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use nzbstream_index::LongRange;
use nzbstream_index::search::find_in;
use nzbstream_pool::AcquireContext;

use super::RandomAccess;
use crate::error::{IngestError, IngestResult};

/// Volumes laid end to end
///
/// Each volume occupies a contiguous sub-range; offsets are mapped to a
/// volume with an interpolation search over the size table.
#[derive(Debug)]
pub struct ConcatStream<S> {
    volumes: Vec<S>,
    ranges: Vec<LongRange>,
}

impl<S: RandomAccess> ConcatStream<S> {
    /// Concatenate `volumes` in order
    pub fn new(volumes: Vec<S>) -> IngestResult<Self> {
        let mut ranges = Vec::with_capacity(volumes.len());
        let mut start = 0i64;
        for volume in &volumes {
            let range = LongRange::from_size(start, volume.len() as i64)?;
            start = range.end;
            ranges.push(range);
        }
        Ok(Self { volumes, ranges })
    }

    /// Range of each volume within the concatenation
    pub fn ranges(&self) -> &[LongRange] {
        &self.ranges
    }

    /// The volumes
    pub fn volumes(&self) -> &[S] {
        &self.volumes
    }
}

#[async_trait]
impl<S: RandomAccess> RandomAccess for ConcatStream<S> {
    fn len(&self) -> u64 {
        self.ranges.last().map_or(0, |r| r.end as u64)
    }

    async fn read_at(&self, offset: u64, len: usize, ctx: &AcquireContext) -> IngestResult<Bytes> {
        let end = offset.saturating_add(len as u64).min(self.len());
        if offset >= end {
            return Ok(Bytes::new());
        }

        let mut out = BytesMut::with_capacity((end - offset) as usize);
        let mut position = offset;
        while position < end {
            let index = find_in(&self.ranges, position as i64)?;
            let range = self.ranges[index];
            let local = position - range.start as u64;
            let want = end.min(range.end as u64) - position;
            let chunk = self.volumes[index]
                .read_at(local, want as usize, ctx)
                .await?;
            if chunk.is_empty() {
                return Err(IngestError::Stream(format!(
                    "volume {index} returned no data at offset {local}"
                )));
            }
            out.extend_from_slice(&chunk);
            position += chunk.len() as u64;
        }
        Ok(out.freeze())
    }
}
