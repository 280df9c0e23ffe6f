//! 7z archive builder
//!
//! Every file with data gets its own single-coder folder and pack stream,
//! laid out in order right after the signature header.

use std::io::Cursor;

const SIGNATURE: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

const COPY: &[u8] = &[0x00];
const LZMA: &[u8] = &[0x03, 0x01, 0x01];
const AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];

/// 7z `NUMBER` encoding
pub fn encode_number(value: u64) -> Vec<u8> {
    let bytes = value.to_le_bytes();
    for extra in 0..8usize {
        let limit_bits = 7 * (extra + 1);
        if limit_bits < 64 && value < (1u64 << limit_bits) {
            // `extra` leading one bits, then the high bits of the value
            let mask = !(0xFFu8 >> extra);
            let high = (value >> (8 * extra)) as u8;
            let mut out = vec![mask | high];
            out.extend_from_slice(&bytes[..extra]);
            return out;
        }
    }
    let mut out = vec![0xFF];
    out.extend_from_slice(&bytes);
    out
}

/// LZMA-compress `data`, returning 7z coder properties and the raw stream
pub fn lzma_pack(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut out = Vec::new();
    lzma_rs::lzma_compress(&mut Cursor::new(data), &mut out).expect("lzma compression");
    // .lzma header: 5 property bytes, then an 8-byte size
    (out[..5].to_vec(), out[13..].to_vec())
}

#[derive(Debug, Clone)]
enum Coding {
    Copy,
    Lzma,
    Aes(Vec<u8>),
}

#[derive(Debug, Clone)]
enum Item {
    File {
        name: String,
        data: Vec<u8>,
        coding: Coding,
    },
    EmptyFile(String),
    Directory(String),
}

struct Folder {
    method: &'static [u8],
    properties: Option<Vec<u8>>,
    unpack_size: u64,
}

/// Builder for a single-volume 7z archive
#[derive(Debug, Clone, Default)]
pub struct SevenZipBuilder {
    items: Vec<Item>,
    encode_header: bool,
}

impl SevenZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored file
    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.items.push(Item::File {
            name: name.to_string(),
            data: data.to_vec(),
            coding: Coding::Copy,
        });
        self
    }

    /// LZMA-compressed file
    pub fn lzma_file(mut self, name: &str, data: &[u8]) -> Self {
        self.items.push(Item::File {
            name: name.to_string(),
            data: data.to_vec(),
            coding: Coding::Lzma,
        });
        self
    }

    /// File behind a 7zAES coder; the payload is zero padded, not encrypted
    pub fn encrypted_file(mut self, name: &str, data: &[u8], aes_properties: &[u8]) -> Self {
        self.items.push(Item::File {
            name: name.to_string(),
            data: data.to_vec(),
            coding: Coding::Aes(aes_properties.to_vec()),
        });
        self
    }

    pub fn empty_file(mut self, name: &str) -> Self {
        self.items.push(Item::EmptyFile(name.to_string()));
        self
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.items.push(Item::Directory(name.to_string()));
        self
    }

    /// LZMA-encode the header database
    pub fn encode_header(mut self) -> Self {
        self.encode_header = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut packed = Vec::new();
        let mut pack_sizes = Vec::new();
        let mut folders = Vec::new();

        for item in &self.items {
            if let Item::File { data, coding, .. } = item {
                let (stream, folder) = match coding {
                    Coding::Copy => (
                        data.clone(),
                        Folder {
                            method: COPY,
                            properties: None,
                            unpack_size: data.len() as u64,
                        },
                    ),
                    Coding::Lzma => {
                        let (props, stream) = lzma_pack(data);
                        (
                            stream,
                            Folder {
                                method: LZMA,
                                properties: Some(props),
                                unpack_size: data.len() as u64,
                            },
                        )
                    }
                    Coding::Aes(props) => {
                        let mut stream = data.clone();
                        stream.resize(data.len().div_ceil(16) * 16, 0);
                        (
                            stream,
                            Folder {
                                method: AES,
                                properties: Some(props.clone()),
                                unpack_size: data.len() as u64,
                            },
                        )
                    }
                };
                pack_sizes.push(stream.len() as u64);
                packed.extend(stream);
                folders.push(folder);
            }
        }

        let mut header = vec![0x01];
        if !folders.is_empty() {
            header.push(0x04);
            header.extend(streams_info(0, &pack_sizes, &folders));
        }
        header.extend(self.files_info());
        header.push(0x00);

        let (database, data_len) = if self.encode_header {
            let (props, stream) = lzma_pack(&header);
            let pack_pos = packed.len() as u64;
            let folder = Folder {
                method: LZMA,
                properties: Some(props),
                unpack_size: header.len() as u64,
            };
            let mut encoded = vec![0x17];
            encoded.extend(streams_info(pack_pos, &[stream.len() as u64], &[folder]));
            packed.extend(stream);
            (encoded, packed.len())
        } else {
            (header, packed.len())
        };

        let mut out = SIGNATURE.to_vec();
        out.extend_from_slice(&[0, 4]);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(data_len as u64).to_le_bytes());
        out.extend_from_slice(&(database.len() as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend(packed);
        out.extend(database);
        out
    }

    fn files_info(&self) -> Vec<u8> {
        let mut out = vec![0x05];
        out.extend(encode_number(self.items.len() as u64));

        let empty_stream: Vec<bool> = self
            .items
            .iter()
            .map(|item| !matches!(item, Item::File { .. }))
            .collect();
        if empty_stream.iter().any(|&e| e) {
            let bits = pack_bits(&empty_stream);
            out.push(0x0E);
            out.extend(encode_number(bits.len() as u64));
            out.extend(bits);

            let empty_file: Vec<bool> = self
                .items
                .iter()
                .filter(|item| !matches!(item, Item::File { .. }))
                .map(|item| matches!(item, Item::EmptyFile(_)))
                .collect();
            let bits = pack_bits(&empty_file);
            out.push(0x0F);
            out.extend(encode_number(bits.len() as u64));
            out.extend(bits);
        }

        let mut names = vec![0x00];
        for item in &self.items {
            let name = match item {
                Item::File { name, .. } | Item::EmptyFile(name) | Item::Directory(name) => name,
            };
            for unit in name.encode_utf16().chain(std::iter::once(0)) {
                names.extend_from_slice(&unit.to_le_bytes());
            }
        }
        out.push(0x11);
        out.extend(encode_number(names.len() as u64));
        out.extend(names);

        out.push(0x00);
        out
    }
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, b)| **b) {
        out[i / 8] |= 0x80 >> (i % 8);
    }
    out
}

fn streams_info(pack_pos: u64, pack_sizes: &[u64], folders: &[Folder]) -> Vec<u8> {
    let mut out = vec![0x06];
    out.extend(encode_number(pack_pos));
    out.extend(encode_number(pack_sizes.len() as u64));
    out.push(0x09);
    for size in pack_sizes {
        out.extend(encode_number(*size));
    }
    out.push(0x00);

    out.extend_from_slice(&[0x07, 0x0B]);
    out.extend(encode_number(folders.len() as u64));
    out.push(0x00);
    for folder in folders {
        out.extend(encode_number(1));
        let mut flags = folder.method.len() as u8;
        if folder.properties.is_some() {
            flags |= 0x20;
        }
        out.push(flags);
        out.extend_from_slice(folder.method);
        if let Some(props) = &folder.properties {
            out.extend(encode_number(props.len() as u64));
            out.extend_from_slice(props);
        }
    }
    out.push(0x0C);
    for folder in folders {
        out.extend(encode_number(folder.unpack_size));
    }
    out.push(0x00);

    out.push(0x00);
    out
}
