//! Grouping of probed files by container type

use std::collections::HashSet;

use nzbstream_formats::names::{FileKind, classify_name};
use nzbstream_formats::{Signature, sniff};
use tracing::{debug, warn};

use crate::probe::ProbedFile;

/// Probed files sorted into extractor groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileGroups {
    /// Plain files indexed as they are
    pub stored: Vec<ProbedFile>,
    /// RAR volumes, any set
    pub rar: Vec<ProbedFile>,
    /// 7z volumes, any set
    pub sevenzip: Vec<ProbedFile>,
    /// `*.mkv.NNN` pieces
    pub mkv: Vec<ProbedFile>,
}

impl FileGroups {
    /// Total number of files
    pub fn len(&self) -> usize {
        self.stored.len() + self.rar.len() + self.sevenzip.len() + self.mkv.len()
    }

    /// Whether no group holds anything
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn kind_of(file: &ProbedFile) -> FileKind {
    let by_name = classify_name(&file.name);
    let signature = sniff(&file.prefix);
    match (by_name, signature) {
        (_, Some(Signature::SevenZip)) if by_name != FileKind::SevenZipVolume => {
            debug!("'{}' carries a 7z signature", file.name);
            FileKind::SevenZipVolume
        }
        (FileKind::Plain | FileKind::SplitMkv, Some(s)) if s.is_rar() => {
            debug!("'{}' carries a RAR signature", file.name);
            FileKind::RarVolume
        }
        (FileKind::RarVolume, None) if !file.prefix.is_empty() => {
            warn!("'{}' is named like a RAR volume but is not one", file.name);
            FileKind::Plain
        }
        (kind, _) => kind,
    }
}

/// Sort probed files into groups
///
/// Files sharing a name collapse into the first one seen. Names decide the
/// group; the first bytes override them when they carry a container
/// signature the name does not admit, or when a RAR-named file lacks one.
pub fn classify(files: Vec<ProbedFile>) -> FileGroups {
    let mut seen = HashSet::new();
    let mut groups = FileGroups::default();

    for file in files {
        if !seen.insert(file.name.clone()) {
            debug!("Skipping duplicate file '{}'", file.name);
            continue;
        }
        match kind_of(&file) {
            FileKind::SevenZipVolume => groups.sevenzip.push(file),
            FileKind::RarVolume => groups.rar.push(file),
            FileKind::SplitMkv => groups.mkv.push(file),
            FileKind::Plain => groups.stored.push(file),
        }
    }

    debug!(
        "Classified files: {} stored, {} rar, {} 7z, {} split mkv",
        groups.stored.len(),
        groups.rar.len(),
        groups.sevenzip.len(),
        groups.mkv.len()
    );
    groups
}
