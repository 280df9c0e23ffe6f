//! 7z archive database reading
//!
//! A 7z set is treated as one logical byte range (the volumes
//! concatenated). [`SevenZipScanner`] asks for the signature header, the
//! database it points at and, for encoded databases, the packed header
//! stream, then maps every file onto that range.

mod aes;
mod coders;
mod database;
mod header;
mod reader;

pub use aes::{AesProperties, derive_decryption_params};
pub use coders::{METHOD_AES, METHOD_COPY, METHOD_LZMA, METHOD_LZMA2, StorageMethod, method_name};
pub use database::{
    ArchiveFile, Coder, Database, Folder, NextHeader, SevenZipEntry, StreamsInfo, parse_next_header,
};
pub use header::{SIGNATURE_HEADER_LEN, SignatureHeader};

use tracing::{debug, trace};

use crate::error::{FormatError, FormatResult};
use crate::request::ReadRequest;

/// Encoded headers wrapping encoded headers are not followed past this depth
const MAX_HEADER_NESTING: usize = 4;

#[derive(Debug)]
enum ScanState {
    Signature,
    Database { offset: u64, len: usize },
    Packed { streams: StreamsInfo, offset: u64, len: usize },
    Done(Database),
}

/// Sans-IO reader for the database of a 7z set
#[derive(Debug)]
pub struct SevenZipScanner {
    total_len: u64,
    state: ScanState,
    nesting: usize,
}

impl SevenZipScanner {
    /// Scanner over a set whose volumes total `total_len` bytes
    pub fn new(total_len: u64) -> Self {
        Self {
            total_len,
            state: ScanState::Signature,
            nesting: 0,
        }
    }

    /// Next range to read, `None` once the database is decoded
    pub fn next_request(&self) -> Option<ReadRequest> {
        match &self.state {
            ScanState::Signature => Some(ReadRequest {
                offset: 0,
                len: usize::try_from(SIGNATURE_HEADER_LEN.min(self.total_len)).unwrap_or(0),
            }),
            ScanState::Database { offset, len } | ScanState::Packed { offset, len, .. } => {
                Some(ReadRequest {
                    offset: *offset,
                    len: *len,
                })
            }
            ScanState::Done(_) => None,
        }
    }

    fn bounded(&self, offset: u64, len: usize) -> FormatResult<(u64, usize)> {
        let end = offset.saturating_add(len as u64);
        if end > self.total_len {
            return Err(FormatError::Truncated {
                offset,
                needed: end - self.total_len,
            });
        }
        Ok((offset, len))
    }

    fn after_header(&mut self, next: NextHeader) -> FormatResult<ScanState> {
        match next {
            NextHeader::Header(db) => Ok(ScanState::Done(db)),
            NextHeader::Encoded(streams) => {
                self.nesting += 1;
                if self.nesting > MAX_HEADER_NESTING {
                    return Err(FormatError::Decode("encoded header nesting too deep".into()));
                }
                if streams.folders.is_empty() || streams.pack_sizes.is_empty() {
                    return Err(FormatError::Decode("encoded header without a folder".into()));
                }
                let offset = streams.pack_stream_offset(0);
                let len = usize::try_from(streams.pack_sizes[0])
                    .map_err(|_| FormatError::Decode("encoded header too large".into()))?;
                let (offset, len) = self.bounded(offset, len)?;
                trace!("Encoded header packed at {} ({} bytes)", offset, len);
                Ok(ScanState::Packed {
                    streams,
                    offset,
                    len,
                })
            }
        }
    }

    /// Supply the bytes for the last request
    pub fn feed(&mut self, data: &[u8]) -> FormatResult<()> {
        let state = std::mem::replace(&mut self.state, ScanState::Signature);
        self.state = match state {
            ScanState::Signature => {
                let header = SignatureHeader::parse(data)?;
                let len = header.next_header_len()?;
                if len == 0 {
                    ScanState::Done(Database::default())
                } else {
                    let (offset, len) = self.bounded(header.next_header_start(), len)?;
                    ScanState::Database { offset, len }
                }
            }
            ScanState::Database { offset, len } => {
                let data = data.get(..len).ok_or_else(|| FormatError::Truncated {
                    offset,
                    needed: len.saturating_sub(data.len()) as u64,
                })?;
                let next = parse_next_header(data, offset)?;
                self.after_header(next)?
            }
            ScanState::Packed {
                streams,
                offset,
                len,
            } => {
                let data = data.get(..len).ok_or_else(|| FormatError::Truncated {
                    offset,
                    needed: len.saturating_sub(data.len()) as u64,
                })?;
                let decoded = coders::decode_folder(&streams.folders[0], data)?;
                let next = parse_next_header(&decoded, offset)?;
                self.after_header(next)?
            }
            done @ ScanState::Done(_) => done,
        };
        Ok(())
    }

    /// Decoded database, once complete
    pub fn database(&self) -> Option<&Database> {
        match &self.state {
            ScanState::Done(db) => Some(db),
            _ => None,
        }
    }

    /// Map the database's files onto the concatenated volumes
    pub fn finish(self) -> FormatResult<Vec<SevenZipEntry>> {
        match self.state {
            ScanState::Done(db) => {
                debug!("7z database lists {} files", db.files.len());
                db.entries()
            }
            _ => Err(FormatError::malformed(0, "database not read")),
        }
    }
}

/// Read the entries of a 7z set held in memory
pub fn parse_archive(data: &[u8]) -> FormatResult<Vec<SevenZipEntry>> {
    let mut scanner = SevenZipScanner::new(data.len() as u64);
    while let Some(request) = scanner.next_request() {
        let start = usize::try_from(request.offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(request.len).min(data.len());
        scanner.feed(&data[start..end])?;
    }
    scanner.finish()
}
