//! Container extractors
//!
//! Each extractor turns one group of probed files into [`Extracted`]
//! results: plain descriptions of where content lives, without touching
//! the index. Aggregation into logical files happens afterwards.

mod mkv;
mod rar;
mod sevenzip;
mod stored;

pub use mkv::SplitMkvExtractor;
pub use rar::RarExtractor;
pub use sevenzip::SevenZipExtractor;
pub use stored::StoredExtractor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nzbstream_formats::RarEntry;
use nzbstream_index::{DecryptionParams, LongRange};
use nzbstream_pool::AcquireContext;

use crate::error::IngestResult;
use crate::probe::ProbedFile;

/// A file indexed as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Filename
    pub name: String,
    /// Articles in order
    pub segment_ids: Vec<String>,
    /// Size in bytes
    pub size: u64,
    /// Posting date
    pub release_date: DateTime<Utc>,
}

/// Headers of one RAR volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarVolumeInfo {
    /// Volume filename
    pub name: String,
    /// Part number derived from the filename
    pub part_number: Option<i32>,
    /// Volume number from the archive headers
    pub volume_number: Option<i32>,
    /// Articles in order
    pub segment_ids: Vec<String>,
    /// Volume size in bytes
    pub volume_size: u64,
    /// File headers found in the volume
    pub entries: Vec<RarEntry>,
    /// Posting date
    pub release_date: DateTime<Utc>,
}

/// One volume of a concatenated set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Volume filename
    pub name: String,
    /// Articles in order
    pub segment_ids: Vec<String>,
    /// Volume size in bytes
    pub size: u64,
}

/// A file inside a 7z set, located on the concatenated volumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevenZipFile {
    /// Path inside the archive
    pub path: String,
    /// Bytes on the concatenated volumes
    pub range: LongRange,
    /// Plaintext size
    pub size: u64,
    /// Directory entry
    pub is_directory: bool,
    /// Key material for encrypted entries
    pub decryption: Option<DecryptionParams>,
}

/// A complete 7z set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevenZipSet {
    /// Name shared by the volumes
    pub archive: String,
    /// Volumes in order
    pub volumes: Vec<Volume>,
    /// Files in archive order
    pub files: Vec<SevenZipFile>,
    /// Posting date of the first volume
    pub release_date: DateTime<Utc>,
}

/// Pieces of a `*.mkv.NNN` split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitMkvFile {
    /// Name of the joined file
    pub name: String,
    /// Pieces in order
    pub volumes: Vec<Volume>,
    /// Posting date of the first piece
    pub release_date: DateTime<Utc>,
}

/// Output of an extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// Plain file
    Stored(StoredFile),
    /// One RAR volume; volumes of a set are joined during aggregation
    RarVolume(RarVolumeInfo),
    /// A 7z set
    SevenZip(SevenZipSet),
    /// A split media file
    SplitMkv(SplitMkvFile),
}

/// Turns a group of probed files into located content
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name for logs
    fn name(&self) -> &'static str;

    /// Locate the content of `files`
    async fn extract(
        &self,
        files: &[ProbedFile],
        ctx: &AcquireContext,
    ) -> IngestResult<Vec<Extracted>>;
}
