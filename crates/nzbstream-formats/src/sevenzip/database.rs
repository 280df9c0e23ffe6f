//! 7z header database
//!
//! Covers the subset of the property tree needed to locate file data:
//! pack/unpack stream layout, substream sizes and file names. Timestamps,
//! attributes and other per-file properties are skipped by size.

use nzbstream_index::LongRange;
use tracing::debug;

use super::coders::{StorageMethod, storage_method};
use super::header::SIGNATURE_HEADER_LEN;
use super::reader::HeaderReader;
use crate::error::{FormatError, FormatResult};

mod id {
    pub const END: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const ARCHIVE_PROPERTIES: u8 = 0x02;
    pub const ADDITIONAL_STREAMS_INFO: u8 = 0x03;
    pub const MAIN_STREAMS_INFO: u8 = 0x04;
    pub const FILES_INFO: u8 = 0x05;
    pub const PACK_INFO: u8 = 0x06;
    pub const UNPACK_INFO: u8 = 0x07;
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    pub const SIZE: u8 = 0x09;
    pub const CRC: u8 = 0x0A;
    pub const FOLDER: u8 = 0x0B;
    pub const CODERS_UNPACK_SIZE: u8 = 0x0C;
    pub const NUM_UNPACK_STREAM: u8 = 0x0D;
    pub const EMPTY_STREAM: u8 = 0x0E;
    pub const EMPTY_FILE: u8 = 0x0F;
    pub const NAME: u8 = 0x11;
    pub const ENCODED_HEADER: u8 = 0x17;
}

const MAX_CODERS: usize = 32;

/// One coder in a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coder {
    /// Method id bytes
    pub method_id: Vec<u8>,
    /// Input stream count
    pub num_in_streams: u64,
    /// Output stream count
    pub num_out_streams: u64,
    /// Coder properties
    pub properties: Option<Vec<u8>>,
}

/// Coder graph producing one unpacked stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Coders in declaration order
    pub coders: Vec<Coder>,
    /// `(in_index, out_index)` links between coders
    pub bind_pairs: Vec<(u64, u64)>,
    /// Coder input indices fed by pack streams
    pub packed_streams: Vec<u64>,
    /// Size of every coder output stream
    pub unpack_sizes: Vec<u64>,
    /// CRC of the final output
    pub crc: Option<u32>,
}

impl Folder {
    /// Size of the output stream not consumed by another coder
    pub fn unpack_size(&self) -> u64 {
        (0..self.unpack_sizes.len() as u64)
            .rev()
            .find(|out| !self.bind_pairs.iter().any(|(_, o)| o == out))
            .and_then(|out| usize::try_from(out).ok())
            .and_then(|out| self.unpack_sizes.get(out).copied())
            .unwrap_or(0)
    }

    fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }
}

/// Pack and unpack stream layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamsInfo {
    /// Offset of the first pack stream, relative to the end of the signature header
    pub pack_pos: u64,
    /// Size of every pack stream
    pub pack_sizes: Vec<u64>,
    /// Folders in order
    pub folders: Vec<Folder>,
    /// Sizes of the files packed into each folder
    pub substream_sizes: Vec<Vec<u64>>,
}

impl StreamsInfo {
    /// Absolute offset of pack stream `index`
    pub fn pack_stream_offset(&self, index: usize) -> u64 {
        SIGNATURE_HEADER_LEN
            + self.pack_pos
            + self.pack_sizes.iter().take(index).sum::<u64>()
    }

    /// First pack stream used by each folder
    fn folder_pack_indices(&self) -> Vec<usize> {
        self.folders
            .iter()
            .scan(0, |next, folder| {
                let first = *next;
                *next += folder.packed_streams.len();
                Some(first)
            })
            .collect()
    }
}

/// File record from `FilesInfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Path inside the archive
    pub name: String,
    /// File has data in some folder
    pub has_stream: bool,
    /// Entry is a directory
    pub is_directory: bool,
}

/// Decoded archive database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Database {
    /// Main stream layout
    pub streams: Option<StreamsInfo>,
    /// Files in archive order
    pub files: Vec<ArchiveFile>,
}

/// Located archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevenZipEntry {
    /// Path inside the archive, `/`-separated
    pub path: String,
    /// Bytes of the entry within the concatenated volumes
    pub range: LongRange,
    /// How the bytes in `range` relate to the file contents
    pub method: StorageMethod,
    /// 7zAES coder properties when encrypted
    pub aes_properties: Option<Vec<u8>>,
    /// Size of the file contents
    pub size: u64,
    /// Entry is a directory
    pub is_directory: bool,
}

/// What the database pointer leads to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHeader {
    /// Plain header
    Header(Database),
    /// Header packed into a folder described here
    Encoded(StreamsInfo),
}

/// Parse the bytes the signature header points at
pub fn parse_next_header(data: &[u8], base: u64) -> FormatResult<NextHeader> {
    let mut r = HeaderReader::new(data, base);
    let at = r.position();
    match r.read_u8()? {
        id::HEADER => Ok(NextHeader::Header(read_header(&mut r)?)),
        id::ENCODED_HEADER => Ok(NextHeader::Encoded(read_streams_info(&mut r)?)),
        other => Err(FormatError::malformed(
            at,
            format!("unexpected database marker {other:#04x}"),
        )),
    }
}

fn read_header(r: &mut HeaderReader<'_>) -> FormatResult<Database> {
    let mut next = r.read_u8()?;
    if next == id::ARCHIVE_PROPERTIES {
        skip_archive_properties(r)?;
        next = r.read_u8()?;
    }
    if next == id::ADDITIONAL_STREAMS_INFO {
        read_streams_info(r)?;
        next = r.read_u8()?;
    }
    let mut db = Database::default();
    if next == id::MAIN_STREAMS_INFO {
        db.streams = Some(read_streams_info(r)?);
        next = r.read_u8()?;
    }
    if next == id::FILES_INFO {
        db.files = read_files_info(r)?;
        next = r.read_u8()?;
    }
    if next != id::END {
        return Err(FormatError::malformed(
            r.position() - 1,
            format!("unexpected header property {next:#04x}"),
        ));
    }
    Ok(db)
}

fn skip_archive_properties(r: &mut HeaderReader<'_>) -> FormatResult<()> {
    while r.read_u8()? != id::END {
        let size = r.read_count()?;
        r.skip(size)?;
    }
    Ok(())
}

fn read_streams_info(r: &mut HeaderReader<'_>) -> FormatResult<StreamsInfo> {
    let mut info = StreamsInfo::default();
    let mut have_substreams = false;
    loop {
        let at = r.position();
        match r.read_u8()? {
            id::END => break,
            id::PACK_INFO => read_pack_info(r, &mut info)?,
            id::UNPACK_INFO => info.folders = read_unpack_info(r)?,
            id::SUBSTREAMS_INFO => {
                info.substream_sizes = read_substreams_info(r, &info.folders)?;
                have_substreams = true;
            }
            other => {
                return Err(FormatError::malformed(
                    at,
                    format!("unexpected streams property {other:#04x}"),
                ));
            }
        }
    }
    if !have_substreams {
        info.substream_sizes = info.folders.iter().map(|f| vec![f.unpack_size()]).collect();
    }
    Ok(info)
}

fn read_pack_info(r: &mut HeaderReader<'_>, info: &mut StreamsInfo) -> FormatResult<()> {
    info.pack_pos = r.read_number()?;
    let count = r.read_count()?;
    loop {
        match r.read_u8()? {
            id::END => break,
            id::SIZE => {
                info.pack_sizes = (0..count)
                    .map(|_| r.read_number())
                    .collect::<FormatResult<_>>()?;
            }
            id::CRC => {
                r.read_digests(count)?;
            }
            _ => {
                let size = r.read_count()?;
                r.skip(size)?;
            }
        }
    }
    if info.pack_sizes.len() != count {
        return Err(FormatError::malformed(r.position(), "pack sizes missing"));
    }
    Ok(())
}

fn read_folder(r: &mut HeaderReader<'_>) -> FormatResult<Folder> {
    let at = r.position();
    let num_coders = r.read_count()?;
    if num_coders == 0 || num_coders > MAX_CODERS {
        return Err(FormatError::malformed(at, format!("{num_coders} coders")));
    }

    let mut coders = Vec::with_capacity(num_coders);
    for _ in 0..num_coders {
        let flags = r.read_u8()?;
        if flags & 0x80 != 0 {
            return Err(FormatError::malformed(at, "alternative coder methods"));
        }
        let method_id = r.read_bytes(usize::from(flags & 0x0F))?.to_vec();
        let (num_in_streams, num_out_streams) = if flags & 0x10 != 0 {
            (r.read_number()?, r.read_number()?)
        } else {
            (1, 1)
        };
        let properties = if flags & 0x20 != 0 {
            let size = r.read_count()?;
            Some(r.read_bytes(size)?.to_vec())
        } else {
            None
        };
        coders.push(Coder {
            method_id,
            num_in_streams,
            num_out_streams,
            properties,
        });
    }

    let total_in: u64 = coders.iter().map(|c| c.num_in_streams).sum();
    let total_out: u64 = coders.iter().map(|c| c.num_out_streams).sum();
    if total_out == 0 || total_in < total_out - 1 {
        return Err(FormatError::malformed(at, "inconsistent coder streams"));
    }
    let bind_pairs = (0..total_out - 1)
        .map(|_| Ok((r.read_number()?, r.read_number()?)))
        .collect::<FormatResult<Vec<_>>>()?;

    let num_packed = total_in - (total_out - 1);
    let packed_streams = if num_packed == 1 {
        let input = (0..total_in)
            .find(|i| !bind_pairs.iter().any(|(bound, _)| bound == i))
            .ok_or_else(|| FormatError::malformed(at, "no unbound coder input"))?;
        vec![input]
    } else {
        (0..num_packed)
            .map(|_| r.read_number())
            .collect::<FormatResult<_>>()?
    };

    Ok(Folder {
        coders,
        bind_pairs,
        packed_streams,
        unpack_sizes: Vec::new(),
        crc: None,
    })
}

fn read_unpack_info(r: &mut HeaderReader<'_>) -> FormatResult<Vec<Folder>> {
    r.expect(id::FOLDER)?;
    let count = r.read_count()?;
    if r.read_u8()? != 0 {
        return Err(FormatError::malformed(r.position(), "external folder data"));
    }
    let mut folders = (0..count)
        .map(|_| read_folder(r))
        .collect::<FormatResult<Vec<_>>>()?;

    r.expect(id::CODERS_UNPACK_SIZE)?;
    for folder in &mut folders {
        folder.unpack_sizes = (0..folder.total_out_streams())
            .map(|_| r.read_number())
            .collect::<FormatResult<_>>()?;
    }

    loop {
        match r.read_u8()? {
            id::END => break,
            id::CRC => {
                let digests = r.read_digests(count)?;
                for (folder, crc) in folders.iter_mut().zip(digests) {
                    folder.crc = crc;
                }
            }
            _ => {
                let size = r.read_count()?;
                r.skip(size)?;
            }
        }
    }
    Ok(folders)
}

fn read_substreams_info(r: &mut HeaderReader<'_>, folders: &[Folder]) -> FormatResult<Vec<Vec<u64>>> {
    let mut counts = vec![1usize; folders.len()];
    let mut next = r.read_u8()?;
    if next == id::NUM_UNPACK_STREAM {
        for count in &mut counts {
            *count = r.read_count()?;
        }
        next = r.read_u8()?;
    }

    let mut sizes = Vec::with_capacity(folders.len());
    for (folder, &count) in folders.iter().zip(&counts) {
        let total = folder.unpack_size();
        if count == 0 {
            sizes.push(Vec::new());
            continue;
        }
        let mut streams = Vec::with_capacity(count);
        if next == id::SIZE {
            for _ in 1..count {
                streams.push(r.read_number()?);
            }
        } else if count > 1 {
            return Err(FormatError::malformed(r.position(), "substream sizes missing"));
        }
        let listed: u64 = streams.iter().sum();
        let last = total.checked_sub(listed).ok_or_else(|| {
            FormatError::malformed(r.position(), "substreams exceed folder size")
        })?;
        streams.push(last);
        sizes.push(streams);
    }
    if next == id::SIZE {
        next = r.read_u8()?;
    }

    loop {
        match next {
            id::END => break,
            id::CRC => {
                let unknown: usize = folders
                    .iter()
                    .zip(&counts)
                    .map(|(folder, &count)| {
                        if count == 1 && folder.crc.is_some() {
                            0
                        } else {
                            count
                        }
                    })
                    .sum();
                r.read_digests(unknown)?;
            }
            _ => {
                let size = r.read_count()?;
                r.skip(size)?;
            }
        }
        next = r.read_u8()?;
    }
    Ok(sizes)
}

fn read_names(data: &[u8], count: usize, at: u64) -> FormatResult<Vec<String>> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let names: Vec<String> = units
        .split(|&unit| unit == 0)
        .take(count)
        .map(|name| String::from_utf16_lossy(name).replace('\\', "/"))
        .collect();
    if names.len() != count {
        return Err(FormatError::malformed(
            at,
            format!("{} names for {count} files", names.len()),
        ));
    }
    Ok(names)
}

fn read_files_info(r: &mut HeaderReader<'_>) -> FormatResult<Vec<ArchiveFile>> {
    let count = r.read_count()?;
    let mut empty_stream = vec![false; count];
    let mut empty_file: Vec<bool> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    loop {
        let property = r.read_u8()?;
        if property == id::END {
            break;
        }
        let size = r.read_count()?;
        let at = r.position();
        let body = r.read_bytes(size)?;
        let mut sub = HeaderReader::new(body, at);
        match property {
            id::EMPTY_STREAM => empty_stream = sub.read_bits(count)?,
            id::EMPTY_FILE => {
                let empties = empty_stream.iter().filter(|&&e| e).count();
                empty_file = sub.read_bits(empties)?;
            }
            id::NAME => {
                if sub.read_u8()? != 0 {
                    return Err(FormatError::malformed(at, "external file names"));
                }
                let rest = sub.remaining();
                names = read_names(sub.read_bytes(rest)?, count, at)?;
            }
            _ => {}
        }
    }

    if names.is_empty() && count > 0 {
        return Err(FormatError::malformed(r.position(), "file names missing"));
    }

    let mut empty_index = 0;
    Ok(names
        .into_iter()
        .zip(empty_stream)
        .map(|(name, is_empty)| {
            let is_directory = is_empty && {
                let empty = empty_file.get(empty_index).copied().unwrap_or(false);
                empty_index += 1;
                !empty
            };
            ArchiveFile {
                name,
                has_stream: !is_empty,
                is_directory,
            }
        })
        .collect())
}

fn to_i64(value: u64, what: &str) -> FormatResult<i64> {
    i64::try_from(value).map_err(|_| FormatError::malformed(value, format!("{what} out of range")))
}

impl Database {
    /// Map every file onto its bytes in the concatenated volumes
    ///
    /// Stored files map onto their own slice of the pack stream. Encrypted
    /// files map onto the whole (encrypted) pack stream of their folder,
    /// which must hold no other file.
    pub fn entries(&self) -> FormatResult<Vec<SevenZipEntry>> {
        let empty = StreamsInfo::default();
        let streams = self.streams.as_ref().unwrap_or(&empty);
        let pack_indices = streams.folder_pack_indices();

        let mut entries = Vec::with_capacity(self.files.len());
        let mut folder_index = 0;
        let mut stream_index = 0;
        let mut offset_in_folder = 0u64;

        for file in &self.files {
            if !file.has_stream {
                entries.push(SevenZipEntry {
                    path: file.name.clone(),
                    range: LongRange::default(),
                    method: StorageMethod::Copy,
                    aes_properties: None,
                    size: 0,
                    is_directory: file.is_directory,
                });
                continue;
            }

            while streams
                .substream_sizes
                .get(folder_index)
                .is_some_and(|s| stream_index >= s.len())
            {
                folder_index += 1;
                stream_index = 0;
                offset_in_folder = 0;
            }
            let (Some(folder), Some(sizes)) = (
                streams.folders.get(folder_index),
                streams.substream_sizes.get(folder_index),
            ) else {
                return Err(FormatError::malformed(
                    0,
                    format!("no stream left for '{}'", file.name),
                ));
            };

            let (method, aes_properties) = storage_method(folder).map_err(|err| match err {
                FormatError::UnsupportedCompression { method, .. } => {
                    FormatError::UnsupportedCompression {
                        entry: file.name.clone(),
                        method,
                    }
                }
                other => other,
            })?;
            let pack_index = pack_indices[folder_index];
            let pack_start = streams.pack_stream_offset(pack_index);
            let size = sizes[stream_index];

            let (start, len) = match method {
                StorageMethod::Copy => (pack_start + offset_in_folder, size),
                StorageMethod::Aes => {
                    if sizes.len() > 1 {
                        return Err(FormatError::UnsupportedCompression {
                            entry: file.name.clone(),
                            method: "7zAES (solid)".to_string(),
                        });
                    }
                    let packed = streams.pack_sizes.get(pack_index).copied().unwrap_or(0);
                    (pack_start, packed)
                }
            };
            let range = LongRange::from_size(to_i64(start, "entry offset")?, to_i64(len, "entry size")?)
                .map_err(|err| FormatError::malformed(start, err.to_string()))?;

            entries.push(SevenZipEntry {
                path: file.name.clone(),
                range,
                method,
                aes_properties,
                size,
                is_directory: false,
            });
            offset_in_folder += size;
            stream_index += 1;
        }

        debug!("7z database maps {} entries", entries.len());
        Ok(entries)
    }
}
