//! Read requests issued by the sans-IO scanners

/// Bytes a scanner needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Absolute offset in the volume (or volume set)
    pub offset: u64,
    /// Number of bytes, already clamped to the available length
    pub len: usize,
}

impl ReadRequest {
    /// Offset one past the last requested byte
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}
