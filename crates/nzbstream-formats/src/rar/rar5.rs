//! RAR 5.x block headers

use super::{Parsed, ParsedBlock, RarBlock, RarEntry, normalize_path};
use crate::error::{FormatError, FormatResult};

const HEAD_MAIN: u64 = 1;
const HEAD_FILE: u64 = 2;
const HEAD_SERVICE: u64 = 3;
const HEAD_CRYPT: u64 = 4;
const HEAD_END: u64 = 5;

const HFL_EXTRA: u64 = 0x0001;
const HFL_DATA: u64 = 0x0002;
const HFL_SPLIT_BEFORE: u64 = 0x0008;
const HFL_SPLIT_AFTER: u64 = 0x0010;

const MHFL_VOLUME: u64 = 0x0001;
const MHFL_VOLNUMBER: u64 = 0x0002;

const FHFL_DIRECTORY: u64 = 0x0001;
const FHFL_UTIME: u64 = 0x0002;
const FHFL_CRC32: u64 = 0x0004;

const EHFL_NEXT_VOLUME: u64 = 0x0001;

const FHEXTRA_CRYPT: u64 = 0x01;

// CRC32 + 1-byte size + type + flags
const MIN_BLOCK_LEN: usize = 7;
const CRC_LEN: usize = 4;

/// Read a little-endian base-128 integer, advancing `offset`
pub(crate) fn read_vint(data: &[u8], offset: &mut usize) -> FormatResult<u64> {
    let start = *offset;
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*offset).ok_or(FormatError::VarInt(start))?;
        *offset += 1;
        if shift >= 64 {
            return Err(FormatError::VarInt(start));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_u32(data: &[u8], offset: &mut usize) -> FormatResult<u32> {
    let bytes = data
        .get(*offset..*offset + 4)
        .ok_or(FormatError::VarInt(*offset))?;
    *offset += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn to_usize(value: u64, block_offset: u64) -> FormatResult<usize> {
    usize::try_from(value)
        .map_err(|_| FormatError::malformed(block_offset, format!("field value {value} too large")))
}

struct FileFields {
    path: String,
    unpacked_size: u64,
    method: u8,
    is_directory: bool,
}

fn read_file_fields(header: &[u8], pos: &mut usize, block_offset: u64) -> FormatResult<FileFields> {
    let file_flags = read_vint(header, pos)?;
    let unpacked_size = read_vint(header, pos)?;
    let _attributes = read_vint(header, pos)?;
    if file_flags & FHFL_UTIME != 0 {
        read_u32(header, pos)?;
    }
    if file_flags & FHFL_CRC32 != 0 {
        read_u32(header, pos)?;
    }
    let compression = read_vint(header, pos)?;
    let _host_os = read_vint(header, pos)?;
    let name_len = to_usize(read_vint(header, pos)?, block_offset)?;
    let name = header
        .get(*pos..*pos + name_len)
        .ok_or_else(|| FormatError::malformed(block_offset, "name runs past header"))?;
    *pos += name_len;

    Ok(FileFields {
        path: normalize_path(&String::from_utf8_lossy(name)),
        unpacked_size,
        method: u8::try_from((compression >> 7) & 0x07).unwrap_or(u8::MAX),
        is_directory: file_flags & FHFL_DIRECTORY != 0,
    })
}

fn has_crypt_record(extra: &[u8]) -> FormatResult<bool> {
    let mut pos = 0;
    while pos < extra.len() {
        let size = read_vint(extra, &mut pos)?;
        let record_start = pos;
        let record_type = read_vint(extra, &mut pos)?;
        if record_type == FHEXTRA_CRYPT {
            return Ok(true);
        }
        pos = record_start.saturating_add(usize::try_from(size).unwrap_or(usize::MAX));
    }
    Ok(false)
}

pub(super) fn parse_block(buf: &[u8], block_offset: u64) -> FormatResult<Parsed<ParsedBlock>> {
    if buf.len() < MIN_BLOCK_LEN {
        return Ok(Parsed::NeedMore(MIN_BLOCK_LEN));
    }
    let mut pos = CRC_LEN;
    let header_size = to_usize(read_vint(buf, &mut pos)?, block_offset)?;
    let total = pos + header_size;
    if header_size < 2 {
        return Err(FormatError::malformed(block_offset, "empty block header"));
    }
    if buf.len() < total {
        return Ok(Parsed::NeedMore(total));
    }

    let header = &buf[..total];
    let block_type = read_vint(header, &mut pos)?;
    let flags = read_vint(header, &mut pos)?;
    let extra_size = if flags & HFL_EXTRA != 0 {
        to_usize(read_vint(header, &mut pos)?, block_offset)?
    } else {
        0
    };
    let data_size = if flags & HFL_DATA != 0 {
        read_vint(header, &mut pos)?
    } else {
        0
    };
    if extra_size > total - pos {
        return Err(FormatError::malformed(
            block_offset,
            format!("extra area of {extra_size} bytes exceeds header"),
        ));
    }
    let extra = &header[total - extra_size..];
    let body = &header[..total - extra_size];
    let data_offset = block_offset + total as u64;
    let next_offset = data_offset.saturating_add(data_size);

    let block = match block_type {
        HEAD_MAIN => {
            let archive_flags = read_vint(body, &mut pos)?;
            let volume_number = if archive_flags & MHFL_VOLNUMBER != 0 {
                let n = read_vint(body, &mut pos)?;
                Some(i32::try_from(n).map_err(|_| {
                    FormatError::malformed(block_offset, format!("volume number {n}"))
                })?)
            } else {
                // only the first volume omits its number
                Some(0)
            };
            RarBlock::Main {
                volume_number,
                is_volume: archive_flags & MHFL_VOLUME != 0,
                first_volume: volume_number == Some(0),
                encrypted_headers: false,
            }
        }
        HEAD_FILE => {
            let fields = read_file_fields(body, &mut pos, block_offset)?;
            RarBlock::File(RarEntry {
                path: fields.path,
                data_offset,
                packed_size: data_size,
                unpacked_size: fields.unpacked_size,
                method: fields.method,
                split_before: flags & HFL_SPLIT_BEFORE != 0,
                split_after: flags & HFL_SPLIT_AFTER != 0,
                encrypted: has_crypt_record(extra)?,
                is_directory: fields.is_directory,
            })
        }
        HEAD_SERVICE => RarBlock::Service(read_file_fields(body, &mut pos, block_offset)?.path),
        HEAD_CRYPT => RarBlock::Encryption,
        HEAD_END => {
            let end_flags = read_vint(body, &mut pos)?;
            RarBlock::End {
                volume_number: None,
                more_volumes: end_flags & EHFL_NEXT_VOLUME != 0,
            }
        }
        other => RarBlock::Other(other),
    };

    Ok(Parsed::Block(ParsedBlock { block, next_offset }))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_utils::rar::{Rar5Entry, rar5_file_header, rar5_main_header, rar5_service_header};

    fn block(bytes: &[u8], offset: u64) -> ParsedBlock {
        match parse_block(bytes, offset).unwrap() {
            Parsed::Block(b) => b,
            Parsed::NeedMore(n) => panic!("unexpected NeedMore({n})"),
        }
    }

    #[test]
    fn test_vint() {
        let data = [0x05, 0xAC, 0x02, 0xFF];
        let mut pos = 0;
        assert_eq!(read_vint(&data, &mut pos).unwrap(), 5);
        assert_eq!(read_vint(&data, &mut pos).unwrap(), 300);
        assert_eq!(pos, 3);
        assert!(matches!(
            read_vint(&data, &mut pos),
            Err(FormatError::VarInt(3))
        ));
    }

    #[test]
    fn test_file_header() {
        let bytes = rar5_file_header(&Rar5Entry::stored("Movie/file.mkv", 4096, 4096));
        let parsed = block(&bytes, 8);
        let RarBlock::File(file) = parsed.block else {
            panic!("file block expected");
        };
        assert_eq!(file.path, "Movie/file.mkv");
        assert_eq!(file.data_offset, 8 + bytes.len() as u64);
        assert_eq!(file.packed_size, 4096);
        assert!(file.is_stored());
        assert!(!file.encrypted);
        assert_eq!(parsed.next_offset, file.data_offset + 4096);
    }

    #[test]
    fn test_split_compressed_encrypted() {
        let mut entry = Rar5Entry::stored("a.bin", 10, 100);
        entry.split_before = true;
        entry.method = 3;
        entry.encrypted = true;
        let parsed = block(&rar5_file_header(&entry), 0);
        let RarBlock::File(file) = parsed.block else {
            panic!("file block expected");
        };
        assert!(file.split_before);
        assert!(!file.split_after);
        assert_eq!(file.method, 3);
        assert!(file.encrypted);
    }

    #[test]
    fn test_main_and_service() {
        let parsed = block(&rar5_main_header(Some(3)), 8);
        assert_eq!(
            parsed.block,
            RarBlock::Main {
                volume_number: Some(3),
                is_volume: true,
                first_volume: false,
                encrypted_headers: false,
            }
        );

        let parsed = block(&rar5_main_header(None), 8);
        assert!(matches!(
            parsed.block,
            RarBlock::Main {
                volume_number: Some(0),
                first_volume: true,
                ..
            }
        ));

        let service = rar5_service_header("QO", 64);
        let parsed = block(&service, 100);
        assert_eq!(parsed.block, RarBlock::Service("QO".into()));
        assert_eq!(parsed.next_offset, 100 + service.len() as u64 + 64);
    }

    #[test]
    fn test_need_more() {
        let bytes = rar5_file_header(&Rar5Entry::stored("file.mkv", 1, 1));
        assert_eq!(parse_block(&bytes[..4], 0).unwrap(), Parsed::NeedMore(7));
        assert_eq!(
            parse_block(&bytes[..9], 0).unwrap(),
            Parsed::NeedMore(bytes.len())
        );
    }
}
