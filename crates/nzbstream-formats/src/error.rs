//! Error types for container parsing

use thiserror::Error;

/// Format operation result type
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors raised while reading archive structures
///
/// Every variant is permanent: the same bytes will fail the same way.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Entry uses a compression method other than stored/copy
    #[error("Unsupported compression method {method} for '{entry}'")]
    UnsupportedCompression {
        /// Entry path within the archive
        entry: String,
        /// Method as reported by the archive
        method: String,
    },

    /// Entry or archive needs a password that was not supplied or is unsupported
    #[error("Archive entry '{0}' is password protected")]
    PasswordProtected(String),

    /// Archive headers themselves are encrypted
    #[error("Archive headers are encrypted")]
    EncryptedHeaders,

    /// Two volumes resolve to the same part number
    #[error("Duplicate volume number {0}")]
    DuplicateVolume(i32),

    /// Volume carries no usable part number
    #[error("Volume '{0}' has no part number")]
    MissingVolumeNumber(String),

    /// Leading bytes are not a known signature
    #[error("Invalid archive signature")]
    InvalidSignature,

    /// Unsupported format revision
    #[error("Unsupported format version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },

    /// Structure runs past the available bytes
    #[error("Truncated data at offset {offset}: need {needed} more bytes")]
    Truncated {
        /// Offset where reading stopped
        offset: u64,
        /// Missing bytes
        needed: u64,
    },

    /// Structure is internally inconsistent
    #[error("Malformed archive at offset {offset}: {reason}")]
    Malformed {
        /// Offset of the offending structure
        offset: u64,
        /// Description of the problem
        reason: String,
    },

    /// Variable-length integer overflowed or ran out of bytes
    #[error("Invalid variable-length integer at offset {0}")]
    VarInt(usize),

    /// Encoded header failed to decompress
    #[error("Failed to decode archive header: {0}")]
    Decode(String),

    /// Binary parsing error
    #[error("Binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl FormatError {
    /// Format errors never go away on retry
    pub fn is_permanent(&self) -> bool {
        true
    }

    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}
