//! Parsed manifest handed to the pipeline
//!
//! Parsing the NZB document itself happens elsewhere; these types are the
//! read-only result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nzbstream_formats::names::subject_filename;

/// One article of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NzbSegment {
    /// Message id, without angle brackets
    pub id: String,
    /// 1-based position within the file
    pub number: u32,
    /// Declared encoded size
    pub bytes: u64,
}

/// One file of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NzbFile {
    /// Subject line, used as a filename hint
    pub subject: String,
    /// Poster
    pub poster: String,
    /// Posting date
    pub date: Option<DateTime<Utc>>,
    /// Articles, in any order
    pub segments: Vec<NzbSegment>,
}

impl NzbFile {
    /// Filename guessed from the subject line
    pub fn file_name_hint(&self) -> String {
        subject_filename(&self.subject)
    }

    /// Message ids ordered by segment number
    pub fn segment_ids(&self) -> Vec<String> {
        let mut segments: Vec<&NzbSegment> = self.segments.iter().collect();
        segments.sort_by_key(|s| s.number);
        segments.into_iter().map(|s| s.id.clone()).collect()
    }

    /// Sum of declared encoded sizes
    pub fn declared_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }
}

/// Metadata from the manifest head
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Title
    pub name: Option<String>,
    /// Category
    pub category: Option<String>,
    /// Archive password
    pub password: Option<String>,
}

/// A parsed manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Files in document order
    pub files: Vec<NzbFile>,
    /// Head metadata
    pub metadata: ManifestMetadata,
}

impl Manifest {
    /// Manifest without metadata
    pub fn new(files: Vec<NzbFile>) -> Self {
        Self {
            files,
            metadata: ManifestMetadata::default(),
        }
    }

    /// Set the archive password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.metadata.password = Some(password.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn segment(id: &str, number: u32) -> NzbSegment {
        NzbSegment {
            id: id.to_string(),
            number,
            bytes: 100,
        }
    }

    #[test]
    fn test_segment_ids_follow_numbers() {
        let file = NzbFile {
            subject: "[1/3] - \"x.part1.rar\" yEnc (1/3)".into(),
            poster: "poster@example.com".into(),
            date: None,
            segments: vec![segment("c", 3), segment("a", 1), segment("b", 2)],
        };
        assert_eq!(file.segment_ids(), vec!["a", "b", "c"]);
        assert_eq!(file.file_name_hint(), "x.part1.rar");
        assert_eq!(file.declared_bytes(), 300);
    }
}
