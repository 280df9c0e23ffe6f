//! Incremental header walk over one volume

use tracing::{debug, trace};

use super::{Parsed, RarBlock, RarEntry, RarVersion, RarVolumeHeaders, parse_block};
use crate::error::{FormatError, FormatResult};
use crate::magic::{RAR5_SIGNATURE, Signature, sniff};
use crate::request::ReadRequest;

/// Bytes requested per header read
const HEADER_WINDOW: usize = 1024;

/// Remaining bytes below which a volume with file headers is considered done
pub const DEFAULT_TAIL_THRESHOLD: u64 = 1000;

/// File headers carrying this name hold archive metadata, not content
const QUICK_OPEN_NAME: &str = "QO";

/// Sans-IO walker over the headers of a single RAR volume
///
/// The caller loops on [`next_request`](Self::next_request), reads the
/// requested range from wherever the volume lives and passes it to
/// [`feed`](Self::feed). Entry data is never requested.
#[derive(Debug)]
pub struct RarVolumeScanner {
    stream_len: u64,
    tail_threshold: u64,
    offset: u64,
    want: usize,
    version: Option<RarVersion>,
    volume_number: Option<i32>,
    entries: Vec<RarEntry>,
    done: bool,
}

impl RarVolumeScanner {
    /// Scanner for a volume of `stream_len` bytes
    pub fn new(stream_len: u64, tail_threshold: u64) -> Self {
        Self {
            stream_len,
            tail_threshold,
            offset: 0,
            want: RAR5_SIGNATURE.len(),
            version: None,
            volume_number: None,
            entries: Vec::new(),
            done: stream_len == 0,
        }
    }

    /// Next range to read, `None` once the walk is complete
    pub fn next_request(&self) -> Option<ReadRequest> {
        if self.done {
            return None;
        }
        let remaining = self.stream_len.saturating_sub(self.offset);
        let len = usize::try_from(remaining).map_or(self.want, |r| r.min(self.want));
        Some(ReadRequest {
            offset: self.offset,
            len,
        })
    }

    /// Whether the walk is complete
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Supply the bytes for the last request
    pub fn feed(&mut self, data: &[u8]) -> FormatResult<()> {
        if self.done {
            return Ok(());
        }

        let Some(version) = self.version else {
            let version = match sniff(data) {
                Some(Signature::Rar4) => RarVersion::Rar4,
                Some(Signature::Rar5) => RarVersion::Rar5,
                _ => return Err(FormatError::InvalidSignature),
            };
            let signature_len = match version {
                RarVersion::Rar4 => Signature::Rar4.byte_len(),
                RarVersion::Rar5 => Signature::Rar5.byte_len(),
            };
            trace!("Detected {:?} volume", version);
            self.version = Some(version);
            self.advance_to(signature_len as u64);
            return Ok(());
        };

        match parse_block(version, data, self.offset)? {
            Parsed::NeedMore(needed) => {
                let end = self.offset + needed as u64;
                if end > self.stream_len {
                    return Err(FormatError::Truncated {
                        offset: self.offset,
                        needed: end - self.stream_len,
                    });
                }
                if needed <= data.len() {
                    return Err(FormatError::malformed(self.offset, "header parser stalled"));
                }
                self.want = needed;
            }
            Parsed::Block(parsed) => {
                if parsed.next_offset <= self.offset {
                    return Err(FormatError::malformed(self.offset, "block does not advance"));
                }
                let at_end = self.handle(parsed.block)?;
                if at_end {
                    self.done = true;
                } else {
                    self.advance_to(parsed.next_offset);
                }
            }
        }
        Ok(())
    }

    fn handle(&mut self, block: RarBlock) -> FormatResult<bool> {
        match block {
            RarBlock::Main {
                volume_number,
                encrypted_headers,
                ..
            } => {
                if encrypted_headers {
                    return Err(FormatError::EncryptedHeaders);
                }
                if volume_number.is_some() {
                    self.volume_number = volume_number;
                }
            }
            RarBlock::Encryption => return Err(FormatError::EncryptedHeaders),
            RarBlock::File(entry) if entry.path == QUICK_OPEN_NAME => {
                trace!("Skipping quick open record at {}", entry.data_offset);
            }
            RarBlock::File(entry) => {
                if !entry.is_directory {
                    if entry.encrypted {
                        return Err(FormatError::PasswordProtected(entry.path));
                    }
                    if !entry.is_stored() {
                        return Err(FormatError::UnsupportedCompression {
                            method: entry.method_name(),
                            entry: entry.path,
                        });
                    }
                }
                trace!(
                    "File header '{}' at {} ({} bytes)",
                    entry.path, entry.data_offset, entry.packed_size
                );
                self.entries.push(entry);
            }
            RarBlock::Service(name) => trace!("Skipping service header '{}'", name),
            RarBlock::Other(kind) => trace!("Skipping block type {:#x}", kind),
            RarBlock::End { volume_number, .. } => {
                if volume_number.is_some() {
                    self.volume_number = volume_number;
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn advance_to(&mut self, offset: u64) {
        self.offset = offset;
        self.want = HEADER_WINDOW;
        let remaining = self.stream_len.saturating_sub(offset);
        if remaining == 0 || (!self.entries.is_empty() && remaining < self.tail_threshold) {
            self.done = true;
        }
    }

    /// Headers collected so far
    ///
    /// Returns `None` when not even the signature has been read.
    pub fn finish(self) -> Option<RarVolumeHeaders> {
        let version = self.version?;
        debug!(
            "Volume scan finished: {:?}, volume {:?}, {} entries",
            version,
            self.volume_number,
            self.entries.len()
        );
        Some(RarVolumeHeaders {
            version,
            volume_number: self.volume_number,
            entries: self.entries,
        })
    }
}

/// Walk the headers of a volume held in memory
pub fn scan_volume(data: &[u8], tail_threshold: u64) -> FormatResult<RarVolumeHeaders> {
    let mut scanner = RarVolumeScanner::new(data.len() as u64, tail_threshold);
    while let Some(request) = scanner.next_request() {
        let start = usize::try_from(request.offset).map_err(|_| FormatError::Truncated {
            offset: request.offset,
            needed: request.len as u64,
        })?;
        let end = start.saturating_add(request.len).min(data.len());
        scanner.feed(&data[start.min(end)..end])?;
    }
    scanner.finish().ok_or(FormatError::InvalidSignature)
}
