//! Logical nodes, parts and file layouts
//!
//! A logical file's bytes are described by an ordered list of [`Part`]s. Each
//! part names the segments backing it and two ranges inside the
//! concatenation of those segments' raw bytes: the whole payload
//! (`segment_range`) and the slice of it that belongs to the file
//! (`content_range`). Concatenating every part's content, in order, yields
//! the logical file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{IndexError, IndexResult};
use crate::range::LongRange;

/// Identity of a node in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// The root directory every tree hangs from
    pub const ROOT: Self = Self(Uuid::nil());

    /// Fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Directory
    Directory,
    /// File stored as-is in one manifest entry
    StoredFile,
    /// File reassembled from several volumes (RAR entries, split media)
    MultipartFile,
    /// Entry of a 7z set addressed through the volumes' concatenation
    RawArchiveEntry,
}

impl NodeKind {
    /// Whether nodes of this kind carry a layout
    pub fn is_file(self) -> bool {
        !matches!(self, Self::Directory)
    }
}

/// File or directory in the exposed tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalNode {
    /// Identity
    pub id: NodeId,
    /// Containing directory, `None` only for the root
    pub parent: Option<NodeId>,
    /// Name within the parent
    pub name: String,
    /// Declared size; `None` for directories
    pub size: Option<i64>,
    /// Node type
    pub kind: NodeKind,
    /// Release date hint taken from the first segment
    pub release_date: Option<DateTime<Utc>>,
    /// Last integrity recheck
    pub last_health_check: Option<DateTime<Utc>>,
    /// Next scheduled integrity recheck
    pub next_health_check: Option<DateTime<Utc>>,
}

impl LogicalNode {
    /// The root directory
    pub fn root() -> Self {
        Self {
            id: NodeId::ROOT,
            parent: None,
            name: String::new(),
            size: None,
            kind: NodeKind::Directory,
            release_date: None,
            last_health_check: None,
            next_health_check: None,
        }
    }

    /// New directory under `parent`
    pub fn directory(parent: NodeId, name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            parent: Some(parent),
            name: name.into(),
            ..Self::root()
        }
    }

    /// New file under `parent`
    pub fn file(parent: NodeId, name: impl Into<String>, kind: NodeKind, size: i64) -> Self {
        Self {
            id: NodeId::new(),
            parent: Some(parent),
            name: name.into(),
            size: Some(size),
            kind,
            release_date: None,
            last_health_check: None,
            next_health_check: None,
        }
    }

    /// Set the release date
    #[must_use]
    pub fn with_release_date(mut self, date: DateTime<Utc>) -> Self {
        self.release_date = Some(date);
        self
    }

    /// Whether this is a directory
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// Slice of a logical file backed by an ordered run of segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Segments whose raw bytes are concatenated for this part
    pub segment_ids: Vec<String>,
    /// Payload range within that concatenation
    pub segment_range: LongRange,
    /// Useful content range, always within `segment_range`
    pub content_range: LongRange,
}

impl Part {
    /// Create a part, checking that content lies within the payload
    pub fn new(
        segment_ids: Vec<String>,
        segment_range: LongRange,
        content_range: LongRange,
    ) -> IndexResult<Self> {
        if !segment_range.contains_range(&content_range) {
            return Err(IndexError::ContentOutsideSegment {
                content: content_range,
                segment: segment_range,
            });
        }
        Ok(Self {
            segment_ids,
            segment_range,
            content_range,
        })
    }

    /// Part whose content is the whole payload `[0, size)`
    pub fn whole(segment_ids: Vec<String>, size: i64) -> IndexResult<Self> {
        let range = LongRange::from_len(size)?;
        Self::new(segment_ids, range, range)
    }

    /// Content bytes contributed to the logical file
    pub fn content_len(&self) -> i64 {
        self.content_range.count()
    }
}

/// Key material for an encrypted entry
///
/// Built once from an archive coder's parameters and a passphrase.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionParams {
    key: [u8; 32],
    iv: [u8; 16],
    decoded_size: u64,
}

impl DecryptionParams {
    /// Bundle derived key material
    pub fn new(key: [u8; 32], iv: [u8; 16], decoded_size: u64) -> Self {
        Self {
            key,
            iv,
            decoded_size,
        }
    }

    /// AES-256 key
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// CBC initialisation vector
    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Size of the plaintext
    pub fn decoded_size(&self) -> u64 {
        self.decoded_size
    }
}

impl fmt::Debug for DecryptionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionParams")
            .field("key", &"<redacted>")
            .field("iv", &self.iv)
            .field("decoded_size", &self.decoded_size)
            .finish()
    }
}

/// Ordered parts of one logical file plus optional decryption
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileLayout {
    /// Parts in logical order
    pub parts: Vec<Part>,
    /// Present when content must be decrypted
    pub decryption: Option<DecryptionParams>,
}

impl FileLayout {
    /// Layout without decryption
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            parts,
            decryption: None,
        }
    }

    /// Attach decryption parameters
    #[must_use]
    pub fn with_decryption(mut self, params: DecryptionParams) -> Self {
        self.decryption = Some(params);
        self
    }

    /// Total content bytes across parts
    pub fn content_size(&self) -> i64 {
        self.parts.iter().map(Part::content_len).sum()
    }

    /// Check part invariants against the declared size
    ///
    /// Parts of an encrypted file hold ciphertext, which may be padded past
    /// the declared plaintext size; the declared size must then match
    /// [`DecryptionParams::decoded_size`].
    pub fn validate(&self, declared_size: i64) -> IndexResult<()> {
        for (index, part) in self.parts.iter().enumerate() {
            if part.segment_ids.is_empty() {
                return Err(IndexError::EmptyPart(index));
            }
            if !part.segment_range.contains_range(&part.content_range) {
                return Err(IndexError::ContentOutsideSegment {
                    content: part.content_range,
                    segment: part.segment_range,
                });
            }
        }
        let actual = self.content_size();
        let consistent = match &self.decryption {
            Some(params) => params.decoded_size as i64 == declared_size && actual >= declared_size,
            None => actual == declared_size,
        };
        if !consistent {
            return Err(IndexError::SizeMismatch {
                declared: declared_size,
                actual,
            });
        }
        Ok(())
    }

    /// Each part's position in the logical file, contiguous from 0
    pub fn logical_ranges(&self) -> Vec<LongRange> {
        let mut offset = 0;
        self.parts
            .iter()
            .map(|part| {
                let range = LongRange {
                    start: offset,
                    end: offset + part.content_len(),
                };
                offset = range.end;
                range
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("seg{i}@test")).collect()
    }

    #[test]
    fn test_part_content_must_be_inside_segment() {
        let segment = LongRange::new(0, 100).unwrap();
        assert!(Part::new(ids(1), segment, LongRange::new(10, 90).unwrap()).is_ok());
        let err = Part::new(ids(1), segment, LongRange::new(50, 120).unwrap()).unwrap_err();
        assert!(matches!(err, IndexError::ContentOutsideSegment { .. }));
    }

    #[test]
    fn test_layout_validation() {
        let layout = FileLayout::new(vec![
            Part::new(
                ids(2),
                LongRange::new(0, 1000).unwrap(),
                LongRange::new(80, 1000).unwrap(),
            )
            .unwrap(),
            Part::new(
                ids(2),
                LongRange::new(0, 1000).unwrap(),
                LongRange::new(40, 600).unwrap(),
            )
            .unwrap(),
        ]);
        assert_eq!(layout.content_size(), 920 + 560);
        assert!(layout.validate(1480).is_ok());
        assert_eq!(
            layout.validate(1500),
            Err(IndexError::SizeMismatch {
                declared: 1500,
                actual: 1480
            })
        );

        let mut empty = layout.clone();
        empty.parts[1].segment_ids.clear();
        assert_eq!(empty.validate(1480), Err(IndexError::EmptyPart(1)));
    }

    #[test]
    fn test_encrypted_layout_allows_padding() {
        let layout = FileLayout::new(vec![Part::whole(ids(1), 48).unwrap()])
            .with_decryption(DecryptionParams::new([0; 32], [0; 16], 40));
        assert!(layout.validate(40).is_ok());
        assert!(layout.validate(48).is_err());
    }

    #[test]
    fn test_logical_ranges_are_contiguous() {
        let layout = FileLayout::new(vec![
            Part::whole(ids(1), 10).unwrap(),
            Part::whole(ids(1), 0).unwrap(),
            Part::whole(ids(1), 7).unwrap(),
        ]);
        assert_eq!(
            layout.logical_ranges(),
            vec![
                LongRange { start: 0, end: 10 },
                LongRange { start: 10, end: 10 },
                LongRange { start: 10, end: 17 },
            ]
        );
    }

    #[test]
    fn test_decryption_debug_redacts_key() {
        let params = DecryptionParams::new([0xAB; 32], [1; 16], 42);
        let debug = format!("{params:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("171"));
        assert_eq!(params.decoded_size(), 42);
    }

    #[test]
    fn test_node_serialization() {
        let node = LogicalNode::file(NodeId::ROOT, "movie.mkv", NodeKind::MultipartFile, 99);
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"multipart_file\""));
        let back: LogicalNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
