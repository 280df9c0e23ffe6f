//! RAR4 and RAR5 volume builders

const RAR4_SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
const RAR5_SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

/// RAR4 file header description
#[derive(Debug, Clone)]
pub struct Rar4Entry {
    pub path: String,
    pub packed_size: u64,
    pub unpacked_size: u64,
    /// Raw method byte, `0x30` is store
    pub method: u8,
    pub split_before: bool,
    pub split_after: bool,
    pub encrypted: bool,
    pub directory: bool,
}

impl Rar4Entry {
    /// Stored (uncompressed) entry
    pub fn stored(path: &str, packed_size: u64, unpacked_size: u64) -> Self {
        Self {
            path: path.to_string(),
            packed_size,
            unpacked_size,
            method: 0x30,
            split_before: false,
            split_after: false,
            encrypted: false,
            directory: false,
        }
    }
}

fn rar4_block(block_type: u8, flags: u16, body: &[u8]) -> Vec<u8> {
    let head_size = u16::try_from(7 + body.len()).expect("RAR4 header too large");
    let mut out = Vec::with_capacity(usize::from(head_size));
    out.extend_from_slice(&0u16.to_le_bytes());
    out.push(block_type);
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&head_size.to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Main archive header
pub fn rar4_main_header(is_volume: bool, first_volume: bool, encrypted_headers: bool) -> Vec<u8> {
    let mut flags = 0u16;
    if is_volume {
        flags |= 0x0001;
    }
    if encrypted_headers {
        flags |= 0x0080;
    }
    if first_volume {
        flags |= 0x0100;
    }
    rar4_block(0x73, flags, &[0; 6])
}

/// File header without its data
pub fn rar4_file_header(entry: &Rar4Entry) -> Vec<u8> {
    let large = entry.packed_size > u64::from(u32::MAX) || entry.unpacked_size > u64::from(u32::MAX);
    let mut flags = 0x8000u16;
    if entry.split_before {
        flags |= 0x0001;
    }
    if entry.split_after {
        flags |= 0x0002;
    }
    if entry.encrypted {
        flags |= 0x0004;
    }
    if entry.directory {
        flags |= 0x00E0;
    }
    if large {
        flags |= 0x0100;
    }

    let name = entry.path.as_bytes();
    let mut body = Vec::new();
    body.extend_from_slice(&(entry.packed_size as u32).to_le_bytes());
    body.extend_from_slice(&(entry.unpacked_size as u32).to_le_bytes());
    body.push(2); // host OS
    body.extend_from_slice(&0u32.to_le_bytes()); // CRC
    body.extend_from_slice(&0u32.to_le_bytes()); // time
    body.push(29); // unpack version
    body.push(entry.method);
    body.extend_from_slice(&u16::try_from(name.len()).expect("name too long").to_le_bytes());
    body.extend_from_slice(&(if entry.directory { 0x10u32 } else { 0x20 }).to_le_bytes());
    if large {
        body.extend_from_slice(&((entry.packed_size >> 32) as u32).to_le_bytes());
        body.extend_from_slice(&((entry.unpacked_size >> 32) as u32).to_le_bytes());
    }
    body.extend_from_slice(name);
    rar4_block(0x74, flags, &body)
}

/// End-of-archive header
pub fn rar4_end_header(volume_number: Option<i32>, more_volumes: bool) -> Vec<u8> {
    let mut flags = 0u16;
    if more_volumes {
        flags |= 0x0001;
    }
    let mut body = Vec::new();
    if let Some(n) = volume_number {
        flags |= 0x0008;
        body.extend_from_slice(&u16::try_from(n).expect("volume number").to_le_bytes());
    }
    rar4_block(0x7B, flags, &body)
}

/// Whole RAR4 volume
#[derive(Debug, Clone, Default)]
pub struct Rar4Volume {
    volume_number: Option<i32>,
    more_volumes: bool,
    encrypted_headers: bool,
    blocks: Vec<u8>,
}

impl Rar4Volume {
    pub fn new() -> Self {
        Self::default()
    }

    /// 0-based number written into the end header
    pub fn volume_number(mut self, number: Option<i32>) -> Self {
        self.volume_number = number;
        self
    }

    pub fn more_volumes(mut self) -> Self {
        self.more_volumes = true;
        self
    }

    pub fn encrypted_headers(mut self) -> Self {
        self.encrypted_headers = true;
        self
    }

    /// File header followed by `data`
    pub fn file(mut self, entry: Rar4Entry, data: &[u8]) -> Self {
        self.blocks.extend(rar4_file_header(&entry));
        self.blocks.extend_from_slice(data);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = RAR4_SIGNATURE.to_vec();
        out.extend(rar4_main_header(
            self.volume_number.is_some() || self.more_volumes,
            self.volume_number.unwrap_or(0) == 0,
            self.encrypted_headers,
        ));
        out.extend(self.blocks);
        out.extend(rar4_end_header(self.volume_number, self.more_volumes));
        out
    }
}

/// Little-endian base-128 integer as used by RAR5
pub fn encode_vint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// RAR5 file header description
#[derive(Debug, Clone)]
pub struct Rar5Entry {
    pub path: String,
    pub packed_size: u64,
    pub unpacked_size: u64,
    /// Method number, 0 is store
    pub method: u8,
    pub split_before: bool,
    pub split_after: bool,
    pub encrypted: bool,
    pub directory: bool,
}

impl Rar5Entry {
    /// Stored (uncompressed) entry
    pub fn stored(path: &str, packed_size: u64, unpacked_size: u64) -> Self {
        Self {
            path: path.to_string(),
            packed_size,
            unpacked_size,
            method: 0,
            split_before: false,
            split_after: false,
            encrypted: false,
            directory: false,
        }
    }
}

/// Generic RAR5 block: CRC, size, type, flags, optional areas, body, extra
pub fn rar5_block(
    header_type: u64,
    mut flags: u64,
    extra: &[u8],
    data_size: Option<u64>,
    body: &[u8],
) -> Vec<u8> {
    if !extra.is_empty() {
        flags |= 0x0001;
    }
    if data_size.is_some() {
        flags |= 0x0002;
    }
    let mut header = encode_vint(header_type);
    header.extend(encode_vint(flags));
    if !extra.is_empty() {
        header.extend(encode_vint(extra.len() as u64));
    }
    if let Some(size) = data_size {
        header.extend(encode_vint(size));
    }
    header.extend_from_slice(body);
    header.extend_from_slice(extra);

    let mut out = vec![0u8; 4];
    out.extend(encode_vint(header.len() as u64));
    out.extend(header);
    out
}

fn rar5_file_body(path: &str, unpacked_size: u64, method: u8, directory: bool) -> Vec<u8> {
    let mut body = encode_vint(u64::from(directory));
    body.extend(encode_vint(unpacked_size));
    body.extend(encode_vint(if directory { 0x10 } else { 0x20 }));
    body.extend(encode_vint(u64::from(method) << 7));
    body.extend(encode_vint(1)); // host OS
    body.extend(encode_vint(path.len() as u64));
    body.extend_from_slice(path.as_bytes());
    body
}

/// Main archive header; `None` writes no volume number
pub fn rar5_main_header(volume_number: Option<u64>) -> Vec<u8> {
    let mut archive_flags = 0x0001;
    if volume_number.is_some() {
        archive_flags |= 0x0002;
    }
    let mut body = encode_vint(archive_flags);
    if let Some(n) = volume_number {
        body.extend(encode_vint(n));
    }
    rar5_block(1, 0, &[], None, &body)
}

/// File header without its data
pub fn rar5_file_header(entry: &Rar5Entry) -> Vec<u8> {
    let mut flags = 0;
    if entry.split_before {
        flags |= 0x0008;
    }
    if entry.split_after {
        flags |= 0x0010;
    }
    let extra = if entry.encrypted {
        // record type 1 (encryption), version 0, flags 0
        let record = [0x01, 0x00, 0x00];
        let mut extra = encode_vint(record.len() as u64);
        extra.extend_from_slice(&record);
        extra
    } else {
        Vec::new()
    };
    let body = rar5_file_body(&entry.path, entry.unpacked_size, entry.method, entry.directory);
    rar5_block(2, flags, &extra, Some(entry.packed_size), &body)
}

/// Service header (`QO`, `RR`, `CMT`, ...) declaring `data_size` bytes
pub fn rar5_service_header(name: &str, data_size: u64) -> Vec<u8> {
    let body = rar5_file_body(name, data_size, 0, false);
    rar5_block(3, 0, &[], Some(data_size), &body)
}

/// End-of-archive header
pub fn rar5_end_header(more_volumes: bool) -> Vec<u8> {
    rar5_block(5, 0, &[], None, &encode_vint(u64::from(more_volumes)))
}

/// Whole RAR5 volume
#[derive(Debug, Clone, Default)]
pub struct Rar5Volume {
    volume_number: Option<i32>,
    more_volumes: bool,
    encrypted_archive: bool,
    blocks: Vec<u8>,
}

impl Rar5Volume {
    pub fn new() -> Self {
        Self::default()
    }

    /// 0-based number written into the main header; 0 and `None` omit it
    pub fn volume_number(mut self, number: Option<i32>) -> Self {
        self.volume_number = number;
        self
    }

    pub fn more_volumes(mut self) -> Self {
        self.more_volumes = true;
        self
    }

    /// Emit an archive encryption header before the main header
    pub fn encrypted_archive(mut self) -> Self {
        self.encrypted_archive = true;
        self
    }

    /// File header followed by `data`
    pub fn file(mut self, entry: Rar5Entry, data: &[u8]) -> Self {
        self.blocks.extend(rar5_file_header(&entry));
        self.blocks.extend_from_slice(data);
        self
    }

    /// Service header followed by `data_size` zero bytes
    pub fn service(mut self, name: &str, data_size: u64) -> Self {
        self.blocks.extend(rar5_service_header(name, data_size));
        self.blocks.extend(std::iter::repeat_n(0u8, data_size as usize));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = RAR5_SIGNATURE.to_vec();
        if self.encrypted_archive {
            out.extend(rar5_block(4, 0, &[], None, &[0x00, 0x00, 0x0F]));
        }
        let number = self.volume_number.filter(|&n| n > 0).map(|n| n as u64);
        out.extend(rar5_main_header(number));
        out.extend(self.blocks);
        out.extend(rar5_end_header(self.more_volumes));
        out
    }
}
