//! 7z signature header

use binrw::BinRead;
use std::io::Cursor;

use crate::error::{FormatError, FormatResult};
use crate::magic::SEVENZIP_SIGNATURE;

/// Size of the signature header at the start of the first volume
pub const SIGNATURE_HEADER_LEN: u64 = 32;

/// Fixed header pointing at the archive database
#[derive(Debug, Clone, PartialEq, Eq, BinRead)]
#[br(little, magic = b"7z\xBC\xAF\x27\x1C")]
pub struct SignatureHeader {
    /// Format major version, always 0
    pub major: u8,
    /// Format minor version
    pub minor: u8,
    /// CRC of the following 20 bytes
    pub start_header_crc: u32,
    /// Offset of the database, relative to the end of this header
    pub next_header_offset: u64,
    /// Database size in bytes
    pub next_header_size: u64,
    /// CRC of the database
    pub next_header_crc: u32,
}

impl SignatureHeader {
    /// Parse the first 32 bytes of an archive
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        if !data.starts_with(&SEVENZIP_SIGNATURE) {
            return Err(FormatError::InvalidSignature);
        }
        if (data.len() as u64) < SIGNATURE_HEADER_LEN {
            return Err(FormatError::Truncated {
                offset: data.len() as u64,
                needed: SIGNATURE_HEADER_LEN - data.len() as u64,
            });
        }
        let header = Self::read(&mut Cursor::new(data))?;
        if header.major != 0 {
            return Err(FormatError::UnsupportedVersion {
                major: header.major,
                minor: header.minor,
            });
        }
        Ok(header)
    }

    /// Absolute offset of the database
    pub fn next_header_start(&self) -> u64 {
        SIGNATURE_HEADER_LEN.saturating_add(self.next_header_offset)
    }

    /// Database size, bounded to what fits in memory
    pub fn next_header_len(&self) -> FormatResult<usize> {
        usize::try_from(self.next_header_size).map_err(|_| {
            FormatError::malformed(
                self.next_header_start(),
                format!("database of {} bytes", self.next_header_size),
            )
        })
    }
}
