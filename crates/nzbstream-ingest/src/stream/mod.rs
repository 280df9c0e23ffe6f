//! Seekable views over segmented files
//!
//! Archive scanners only ever ask for small windows at arbitrary offsets.
//! [`SegmentStream`] serves those windows from the articles of one manifest
//! entry, and [`ConcatStream`] strings several volumes into one range.

mod concat;
mod existence;
mod segment;

pub use concat::ConcatStream;
pub use existence::{check_segments_exist, sample_segments};
pub use segment::{SegmentStream, resolve_file_size};

use async_trait::async_trait;
use bytes::Bytes;
use nzbstream_formats::ReadRequest;
use nzbstream_pool::AcquireContext;

use crate::error::IngestResult;

/// Random-access byte source
#[async_trait]
pub trait RandomAccess: Send + Sync {
    /// Total length in bytes
    fn len(&self) -> u64;

    /// Whether the source holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes at `offset`, clamped at the end
    async fn read_at(&self, offset: u64, len: usize, ctx: &AcquireContext) -> IngestResult<Bytes>;

    /// Serve a scanner's read request
    async fn read_request(&self, request: ReadRequest, ctx: &AcquireContext) -> IngestResult<Bytes> {
        self.read_at(request.offset, request.len, ctx).await
    }
}
