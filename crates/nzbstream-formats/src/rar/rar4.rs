//! RAR 1.5-4.x block headers

use binrw::BinRead;
use std::io::Cursor;

use super::{Parsed, ParsedBlock, RarBlock, RarEntry, normalize_path};
use crate::error::{FormatError, FormatResult};

const BLOCK_MAIN: u8 = 0x73;
const BLOCK_FILE: u8 = 0x74;
const BLOCK_SERVICE: u8 = 0x7A;
const BLOCK_END: u8 = 0x7B;

const BASE_BLOCK_LEN: usize = 7;
const FILE_FIXED_LEN: usize = 32;

const FLAG_LONG_BLOCK: u16 = 0x8000;

const MHD_VOLUME: u16 = 0x0001;
const MHD_PASSWORD: u16 = 0x0080;
const MHD_FIRSTVOLUME: u16 = 0x0100;

const LHD_SPLIT_BEFORE: u16 = 0x0001;
const LHD_SPLIT_AFTER: u16 = 0x0002;
const LHD_PASSWORD: u16 = 0x0004;
const LHD_DIRECTORY: u16 = 0x00E0;
const LHD_LARGE: u16 = 0x0100;
const LHD_UNICODE: u16 = 0x0200;

const EARC_NEXT_VOLUME: u16 = 0x0001;
const EARC_DATACRC: u16 = 0x0002;
const EARC_VOLNUMBER: u16 = 0x0008;

const METHOD_BASE: u8 = 0x30;

/// Fields shared by every block
#[derive(Debug, BinRead)]
#[br(little)]
struct BaseBlock {
    // header CRC16 precedes the type
    #[br(pad_before = 2)]
    block_type: u8,
    flags: u16,
    head_size: u16,
}

/// File and service header body after the base block
#[derive(Debug, BinRead)]
#[br(little, import(flags: u16))]
struct FileHeader {
    pack_size: u32,
    unpacked_size: u32,
    // host OS, CRC32, DOS time, unpack version
    #[br(pad_before = 10)]
    method: u8,
    // attributes follow the name length
    #[br(pad_after = 4)]
    name_size: u16,
    #[br(if(flags & LHD_LARGE != 0))]
    high_pack_size: Option<u32>,
    #[br(if(flags & LHD_LARGE != 0))]
    high_unpacked_size: Option<u32>,
    #[br(count = name_size)]
    name: Vec<u8>,
}

impl FileHeader {
    fn packed(&self) -> u64 {
        (u64::from(self.high_pack_size.unwrap_or(0)) << 32) | u64::from(self.pack_size)
    }

    fn unpacked(&self) -> u64 {
        (u64::from(self.high_unpacked_size.unwrap_or(0)) << 32) | u64::from(self.unpacked_size)
    }

    fn path(&self, flags: u16) -> String {
        let raw = if flags & LHD_UNICODE != 0 {
            // ASCII name, NUL, then the packed unicode form
            self.name.split(|&b| b == 0).next().unwrap_or(&self.name)
        } else {
            &self.name
        };
        normalize_path(&String::from_utf8_lossy(raw))
    }
}

fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
    buf.get(pos..pos + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], pos: usize) -> Option<u32> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(super) fn parse_block(buf: &[u8], block_offset: u64) -> FormatResult<Parsed<ParsedBlock>> {
    if buf.len() < BASE_BLOCK_LEN {
        return Ok(Parsed::NeedMore(BASE_BLOCK_LEN));
    }
    let base = BaseBlock::read(&mut Cursor::new(buf))?;
    let head_size = usize::from(base.head_size);
    if head_size < BASE_BLOCK_LEN {
        return Err(FormatError::malformed(
            block_offset,
            format!("header size {head_size} below minimum"),
        ));
    }
    if buf.len() < head_size {
        return Ok(Parsed::NeedMore(head_size));
    }
    let header = &buf[..head_size];

    let add_size = if base.flags & FLAG_LONG_BLOCK != 0 {
        read_u32(header, BASE_BLOCK_LEN)
            .map(u64::from)
            .ok_or_else(|| FormatError::malformed(block_offset, "long block without size"))?
    } else {
        0
    };
    let data_offset = block_offset + head_size as u64;

    let parsed = match base.block_type {
        BLOCK_MAIN => ParsedBlock {
            block: RarBlock::Main {
                volume_number: None,
                is_volume: base.flags & MHD_VOLUME != 0,
                first_volume: base.flags & MHD_FIRSTVOLUME != 0,
                encrypted_headers: base.flags & MHD_PASSWORD != 0,
            },
            next_offset: data_offset + add_size,
        },
        BLOCK_FILE | BLOCK_SERVICE => {
            if head_size < FILE_FIXED_LEN {
                return Err(FormatError::malformed(
                    block_offset,
                    format!("file header of {head_size} bytes"),
                ));
            }
            let mut cursor = Cursor::new(&header[BASE_BLOCK_LEN..]);
            let file = FileHeader::read_args(&mut cursor, (base.flags,))?;
            let path = file.path(base.flags);
            let packed_size = file.packed();
            let next_offset = data_offset.saturating_add(packed_size);

            if base.block_type == BLOCK_SERVICE {
                ParsedBlock {
                    block: RarBlock::Service(path),
                    next_offset,
                }
            } else {
                ParsedBlock {
                    block: RarBlock::File(RarEntry {
                        path,
                        data_offset,
                        packed_size,
                        unpacked_size: file.unpacked(),
                        method: file.method.saturating_sub(METHOD_BASE),
                        split_before: base.flags & LHD_SPLIT_BEFORE != 0,
                        split_after: base.flags & LHD_SPLIT_AFTER != 0,
                        encrypted: base.flags & LHD_PASSWORD != 0,
                        is_directory: base.flags & LHD_DIRECTORY == LHD_DIRECTORY,
                    }),
                    next_offset,
                }
            }
        }
        BLOCK_END => {
            let mut pos = BASE_BLOCK_LEN;
            if base.flags & EARC_DATACRC != 0 {
                pos += 4;
            }
            let volume_number = if base.flags & EARC_VOLNUMBER != 0 {
                read_u16(header, pos).map(i32::from)
            } else {
                None
            };
            ParsedBlock {
                block: RarBlock::End {
                    volume_number,
                    more_volumes: base.flags & EARC_NEXT_VOLUME != 0,
                },
                next_offset: data_offset + add_size,
            }
        }
        other => ParsedBlock {
            block: RarBlock::Other(u64::from(other)),
            next_offset: data_offset + add_size,
        },
    };
    Ok(Parsed::Block(parsed))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_utils::rar::{Rar4Entry, rar4_file_header, rar4_main_header};

    #[test]
    fn test_file_header() {
        let entry = Rar4Entry::stored("dir\\movie.mkv", 5000, 12000);
        let bytes = rar4_file_header(&entry);

        let Parsed::Block(parsed) = parse_block(&bytes, 100).unwrap() else {
            panic!("complete header expected");
        };
        let RarBlock::File(file) = parsed.block else {
            panic!("file block expected");
        };
        assert_eq!(file.path, "dir/movie.mkv");
        assert_eq!(file.data_offset, 100 + bytes.len() as u64);
        assert_eq!(file.packed_size, 5000);
        assert_eq!(file.unpacked_size, 12000);
        assert!(file.is_stored());
        assert_eq!(parsed.next_offset, file.data_offset + 5000);
    }

    #[test]
    fn test_large_sizes_and_flags() {
        let mut entry = Rar4Entry::stored("big.bin", 0x1_0000_0010, 0x2_0000_0000);
        entry.split_after = true;
        entry.method = 0x33;
        let bytes = rar4_file_header(&entry);

        let Parsed::Block(parsed) = parse_block(&bytes, 0).unwrap() else {
            panic!("complete header expected");
        };
        let RarBlock::File(file) = parsed.block else {
            panic!("file block expected");
        };
        assert_eq!(file.packed_size, 0x1_0000_0010);
        assert_eq!(file.unpacked_size, 0x2_0000_0000);
        assert!(file.split_after);
        assert!(!file.split_before);
        assert_eq!(file.method, 3);
    }

    #[test]
    fn test_need_more() {
        let bytes = rar4_file_header(&Rar4Entry::stored("movie.mkv", 10, 10));
        assert_eq!(parse_block(&bytes[..3], 0).unwrap(), Parsed::NeedMore(7));
        assert_eq!(
            parse_block(&bytes[..10], 0).unwrap(),
            Parsed::NeedMore(bytes.len())
        );
    }

    #[test]
    fn test_main_header_flags() {
        let bytes = rar4_main_header(true, true, false);
        let Parsed::Block(parsed) = parse_block(&bytes, 7).unwrap() else {
            panic!("complete header expected");
        };
        assert_eq!(
            parsed.block,
            RarBlock::Main {
                volume_number: None,
                is_volume: true,
                first_volume: true,
                encrypted_headers: false,
            }
        );
        assert_eq!(parsed.next_offset, 7 + bytes.len() as u64);
    }
}
