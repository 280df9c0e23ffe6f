//! RAR volume header walking
//!
//! Only block headers are read; entry data is skipped using the sizes the
//! headers declare. Parsers work on byte windows and report
//! [`Parsed::NeedMore`] when a header runs past the window, so callers can
//! feed them from a network stream without buffering whole volumes.

mod order;
mod rar4;
mod rar5;
mod scanner;

pub use order::resolve_part_order;
pub use scanner::{DEFAULT_TAIL_THRESHOLD, RarVolumeScanner, scan_volume};

use crate::error::FormatResult;

/// Stored method number (RAR4 `0x30`, RAR5 `0`)
pub const METHOD_STORE: u8 = 0;

/// RAR container revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RarVersion {
    /// RAR 1.5 to 4.x
    Rar4,
    /// RAR 5.x
    Rar5,
}

/// One file header in a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarEntry {
    /// Path inside the archive, `/`-separated
    pub path: String,
    /// Absolute offset of the entry's data within the volume
    pub data_offset: u64,
    /// Data bytes stored in this volume
    pub packed_size: u64,
    /// Size of the whole entry once reassembled
    pub unpacked_size: u64,
    /// Compression method, 0 (store) to 5 (best)
    pub method: u8,
    /// Data continues from the previous volume
    pub split_before: bool,
    /// Data continues in the next volume
    pub split_after: bool,
    /// Entry data is encrypted
    pub encrypted: bool,
    /// Entry is a directory
    pub is_directory: bool,
}

impl RarEntry {
    /// Whether the entry is stored without compression
    pub fn is_stored(&self) -> bool {
        self.method == METHOD_STORE
    }

    /// Human-readable method for error messages
    pub fn method_name(&self) -> String {
        format!("m{}", self.method)
    }
}

/// Everything learned from one volume's headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarVolumeHeaders {
    /// Container revision
    pub version: RarVersion,
    /// 0-based volume number from the headers, when present
    pub volume_number: Option<i32>,
    /// File headers in order of appearance
    pub entries: Vec<RarEntry>,
}

/// Block decoded from a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RarBlock {
    /// Main archive header
    Main {
        /// 0-based volume number, when the header carries one
        volume_number: Option<i32>,
        /// Archive is part of a multi-volume set
        is_volume: bool,
        /// Archive is flagged as the first volume
        first_volume: bool,
        /// Following headers are encrypted
        encrypted_headers: bool,
    },
    /// File header
    File(RarEntry),
    /// Service header (`CMT`, `QO`, `RR`, ...), skipped
    Service(String),
    /// RAR5 archive encryption header
    Encryption,
    /// End of archive
    End {
        /// 0-based volume number, when present
        volume_number: Option<i32>,
        /// Another volume follows
        more_volumes: bool,
    },
    /// Anything else, skipped by its declared size
    Other(u64),
}

/// Block plus where the next one starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    /// Decoded block
    pub block: RarBlock,
    /// Absolute offset of the next block
    pub next_offset: u64,
}

/// Outcome of parsing a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    /// Complete value
    Block(T),
    /// Window must hold at least this many bytes from the block start
    NeedMore(usize),
}

/// Parse the block starting at `buf[0]`, located at `block_offset` in the volume
pub fn parse_block(
    version: RarVersion,
    buf: &[u8],
    block_offset: u64,
) -> FormatResult<Parsed<ParsedBlock>> {
    match version {
        RarVersion::Rar4 => rar4::parse_block(buf, block_offset),
        RarVersion::Rar5 => rar5::parse_block(buf, block_offset),
    }
}

/// Normalise a stored path to `/` separators
fn normalize_path(raw: &str) -> String {
    raw.replace('\\', "/").trim_matches('/').to_string()
}
