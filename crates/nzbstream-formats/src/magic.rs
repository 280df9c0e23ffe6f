//! Container signatures

/// RAR 1.5 to 4.x marker block
pub const RAR4_SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
/// RAR 5.0 signature
pub const RAR5_SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];
/// 7z signature
pub const SEVENZIP_SIGNATURE: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Container recognised from leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    /// RAR 4.x and earlier
    Rar4,
    /// RAR 5.x
    Rar5,
    /// 7-Zip
    SevenZip,
}

impl Signature {
    /// Length of the signature in bytes
    pub fn byte_len(self) -> usize {
        match self {
            Self::Rar4 => RAR4_SIGNATURE.len(),
            Self::Rar5 => RAR5_SIGNATURE.len(),
            Self::SevenZip => SEVENZIP_SIGNATURE.len(),
        }
    }

    /// Whether this is one of the RAR signatures
    pub fn is_rar(self) -> bool {
        matches!(self, Self::Rar4 | Self::Rar5)
    }
}

/// Identify a container from the start of its first volume
pub fn sniff(prefix: &[u8]) -> Option<Signature> {
    if prefix.starts_with(&RAR5_SIGNATURE) {
        Some(Signature::Rar5)
    } else if prefix.starts_with(&RAR4_SIGNATURE) {
        Some(Signature::Rar4)
    } else if prefix.starts_with(&SEVENZIP_SIGNATURE) {
        Some(Signature::SevenZip)
    } else {
        None
    }
}
