//! Assembly of extracted content into logical files
//!
//! Everything lands in a [`PendingBatch`] rooted at
//! `content/<category>/<job>`; nothing is written until the caller commits.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use nzbstream_formats::names::{
    RarVolumeName, is_probably_obfuscated, is_video_file, rar_volume_name, split_extension,
};
use nzbstream_formats::resolve_part_order;
use nzbstream_index::search::find_in;
use nzbstream_index::{
    FileLayout, IndexStore, LogicalNode, LongRange, NodeId, NodeKind, Part, PendingBatch,
};
use tracing::{debug, info, warn};

use crate::error::{IngestError, IngestResult};
use crate::extract::{Extracted, RarVolumeInfo, SevenZipSet, SplitMkvFile, StoredFile};

/// Top-level directory holding every category
pub const CONTENT_DIR: &str = "content";

fn components(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect()
}

/// `name` made unique among `taken` as `stem (n).ext`, counting from 2
fn unique_name(taken: &HashSet<String>, name: &str) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    let mut n = 2;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Stages the directory tree of one ingest unit
#[derive(Debug)]
pub struct TreeBuilder {
    root: NodeId,
    batch: PendingBatch,
    directories: HashMap<String, NodeId>,
    names: HashMap<NodeId, HashSet<String>>,
    files: usize,
}

impl TreeBuilder {
    /// Stage `content/<category>/<job_name>`, reusing directories that exist
    pub async fn start<S: IndexStore + ?Sized>(
        store: &S,
        category: &str,
        job_name: &str,
    ) -> IngestResult<Self> {
        let mut batch = PendingBatch::new();
        let mut parent = NodeId::ROOT;
        let mut staged = false;
        for name in [CONTENT_DIR, category] {
            let existing = if staged {
                None
            } else {
                store.find_child(parent, name).await?
            };
            parent = match existing {
                Some(node) => node.id,
                None => {
                    staged = true;
                    let node = LogicalNode::directory(parent, name);
                    let id = node.id;
                    batch.push_directory(node);
                    id
                }
            };
        }

        let job = LogicalNode::directory(parent, job_name);
        let root = job.id;
        batch.push_directory(job);
        debug!("Staging '{}/{}/{}'", CONTENT_DIR, category, job_name);

        Ok(Self {
            root,
            batch,
            directories: HashMap::new(),
            names: HashMap::new(),
            files: 0,
        })
    }

    /// The job directory
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Files staged so far
    pub fn file_count(&self) -> usize {
        self.files
    }

    fn claim(&mut self, parent: NodeId, name: &str) -> String {
        let taken = self.names.entry(parent).or_default();
        let unique = unique_name(taken, name);
        if unique != name {
            debug!("'{}' is taken, using '{}'", name, unique);
        }
        taken.insert(unique.clone());
        unique
    }

    fn directory_of(&mut self, parts: &[&str]) -> NodeId {
        let mut parent = self.root;
        let mut path = String::new();
        for part in parts {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(part);
            parent = match self.directories.get(&path) {
                Some(id) => *id,
                None => {
                    let name = self.claim(parent, part);
                    let node = LogicalNode::directory(parent, name);
                    let id = node.id;
                    self.batch.push_directory(node);
                    self.directories.insert(path.clone(), id);
                    id
                }
            };
        }
        parent
    }

    /// Directory at `path` below the job directory, staging missing levels
    pub fn directory(&mut self, path: &str) -> NodeId {
        self.directory_of(&components(path))
    }

    /// Stage a file at `path` after checking its layout against `size`
    pub fn add_file(
        &mut self,
        path: &str,
        kind: NodeKind,
        size: u64,
        layout: FileLayout,
        release_date: DateTime<Utc>,
    ) -> IngestResult<NodeId> {
        let size = i64::try_from(size)
            .map_err(|_| IngestError::Stream(format!("'{path}' is too large to index")))?;
        layout.validate(size)?;

        let parts = components(path);
        let (file_name, dirs) = match parts.split_last() {
            Some((name, dirs)) => ((*name).to_string(), dirs.to_vec()),
            None => ("unnamed".to_string(), Vec::new()),
        };
        let parent = self.directory_of(&dirs);
        let name = self.claim(parent, &file_name);

        let node = LogicalNode::file(parent, name, kind, size).with_release_date(release_date);
        let id = node.id;
        self.batch.push_file(node, layout);
        self.files += 1;
        Ok(id)
    }

    /// Job directory plus everything staged
    pub fn finish(self) -> (NodeId, PendingBatch) {
        (self.root, self.batch)
    }
}

/// Aggregation switches
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Name of the ingest unit
    pub job_name: String,
    /// Rename a lone obfuscated archive member after the job
    pub rename_obfuscated: bool,
}

/// Final path of an archive member, renamed after its containing directory
/// when it is the only file of its archive and its name looks random
fn member_path(path: &str, lone: bool, options: &AggregateOptions) -> String {
    if !(lone && options.rename_obfuscated) {
        return path.to_string();
    }
    let parts = components(path);
    let Some((name, dirs)) = parts.split_last() else {
        return path.to_string();
    };
    if !is_probably_obfuscated(name) {
        return path.to_string();
    }
    let directory = dirs.last().copied().unwrap_or(options.job_name.as_str());
    let renamed = match split_extension(name).1 {
        Some(ext) => format!("{directory}.{ext}"),
        None => directory.to_string(),
    };
    info!("Renaming obfuscated '{}' to '{}'", name, renamed);
    let mut full: Vec<&str> = dirs.to_vec();
    full.push(&renamed);
    full.join("/")
}

fn add_stored(builder: &mut TreeBuilder, file: StoredFile) -> IngestResult<()> {
    let size = i64::try_from(file.size).unwrap_or(i64::MAX);
    let layout = FileLayout::new(vec![Part::whole(file.segment_ids, size)?]);
    builder.add_file(
        &file.name,
        NodeKind::StoredFile,
        file.size,
        layout,
        file.release_date,
    )?;
    Ok(())
}

fn add_split_mkv(builder: &mut TreeBuilder, file: SplitMkvFile) -> IngestResult<()> {
    let size: u64 = file.volumes.iter().map(|v| v.size).sum();
    let parts = file
        .volumes
        .into_iter()
        .map(|v| Part::whole(v.segment_ids, i64::try_from(v.size).unwrap_or(i64::MAX)))
        .collect::<Result<Vec<_>, _>>()?;
    builder.add_file(
        &file.name,
        NodeKind::MultipartFile,
        size,
        FileLayout::new(parts),
        file.release_date,
    )?;
    Ok(())
}

fn add_sevenzip(
    builder: &mut TreeBuilder,
    set: SevenZipSet,
    options: &AggregateOptions,
) -> IngestResult<()> {
    let mut start = 0i64;
    let mut volume_ranges = Vec::with_capacity(set.volumes.len());
    for volume in &set.volumes {
        let range = LongRange::from_size(start, i64::try_from(volume.size).unwrap_or(i64::MAX))?;
        start = range.end;
        volume_ranges.push(range);
    }

    let lone = set.files.iter().filter(|f| !f.is_directory).count() == 1;
    for file in set.files {
        if file.is_directory {
            builder.directory(&file.path);
            continue;
        }

        let mut parts = Vec::new();
        if !file.range.is_empty() {
            let first = find_in(&volume_ranges, file.range.start)?;
            for (volume, range) in set.volumes.iter().zip(&volume_ranges).skip(first) {
                let Some(overlap) = range.intersect(&file.range) else {
                    break;
                };
                parts.push(Part::new(
                    volume.segment_ids.clone(),
                    LongRange::from_len(range.count())?,
                    overlap.shift(-range.start),
                )?);
            }
        }

        let mut layout = FileLayout::new(parts);
        if let Some(params) = file.decryption {
            layout = layout.with_decryption(params);
        }
        builder.add_file(
            &member_path(&file.path, lone, options),
            NodeKind::RawArchiveEntry,
            file.size,
            layout,
            set.release_date,
        )?;
    }
    Ok(())
}

/// Parts of one archive member, gathered across volumes
struct Member {
    unpacked_size: u64,
    parts: Vec<Part>,
    packed_total: u64,
}

fn add_rar_set(
    builder: &mut TreeBuilder,
    archive: &str,
    volumes: Vec<RarVolumeInfo>,
    options: &AggregateOptions,
) -> IngestResult<()> {
    let numbers: Vec<_> = volumes
        .iter()
        .map(|v| (v.volume_number, v.part_number))
        .collect();
    let order = if numbers.len() == 1 {
        vec![0]
    } else {
        resolve_part_order(&numbers)?
    };
    let mut ordered: Vec<(i32, RarVolumeInfo)> = order.into_iter().zip(volumes).collect();
    ordered.sort_by_key(|(number, _)| *number);
    let release_date = ordered.first().map_or_else(Utc::now, |(_, v)| v.release_date);

    let mut paths: Vec<String> = Vec::new();
    let mut members: HashMap<String, Member> = HashMap::new();
    for (_, volume) in &ordered {
        let volume_range = LongRange::from_len(i64::try_from(volume.volume_size).unwrap_or(i64::MAX))?;
        for entry in &volume.entries {
            if entry.is_directory {
                builder.directory(&entry.path);
                continue;
            }
            let content = LongRange::from_size(
                i64::try_from(entry.data_offset).unwrap_or(i64::MAX),
                i64::try_from(entry.packed_size).unwrap_or(i64::MAX),
            )?;
            let part = Part::new(volume.segment_ids.clone(), volume_range, content)?;
            let member = members.entry(entry.path.clone()).or_insert_with(|| {
                paths.push(entry.path.clone());
                Member {
                    unpacked_size: entry.unpacked_size,
                    parts: Vec::new(),
                    packed_total: 0,
                }
            });
            member.parts.push(part);
            member.packed_total += entry.packed_size;
        }
    }

    debug!(
        "RAR set '{}': {} volumes, {} files",
        archive,
        ordered.len(),
        paths.len()
    );
    let lone = paths.len() == 1;
    for path in paths {
        let Some(member) = members.remove(&path) else {
            continue;
        };
        if member.packed_total != member.unpacked_size {
            if is_video_file(&path) {
                warn!(
                    "'{}' in '{}' declares {} bytes but its volumes hold {}",
                    path, archive, member.unpacked_size, member.packed_total
                );
                return Err(IngestError::MissingSegments { file: path });
            }
            warn!(
                "Skipping '{}' in '{}': volumes hold {} of {} bytes",
                path, archive, member.packed_total, member.unpacked_size
            );
            continue;
        }
        builder.add_file(
            &member_path(&path, lone, options),
            NodeKind::MultipartFile,
            member.unpacked_size,
            FileLayout::new(member.parts),
            release_date,
        )?;
    }
    Ok(())
}

/// Set name of a RAR volume whose filename can be trusted for grouping
///
/// `None` when the name follows no volume pattern or its archive part looks
/// random; such volumes are grouped by content instead.
pub(crate) fn named_rar_volume(name: &str) -> Option<RarVolumeName> {
    rar_volume_name(name).filter(|v| !is_probably_obfuscated(&v.archive))
}

/// Join volumes that continue each other's split members
///
/// Volumes without split entries stay on their own.
fn group_by_members(volumes: Vec<RarVolumeInfo>) -> Vec<Vec<RarVolumeInfo>> {
    let mut groups: Vec<(HashSet<String>, Vec<RarVolumeInfo>)> = Vec::new();
    for volume in volumes {
        let mut paths: HashSet<String> = volume
            .entries
            .iter()
            .filter(|e| e.split_before || e.split_after)
            .map(|e| e.path.clone())
            .collect();
        let mut members = vec![volume];
        let mut index = 0;
        while index < groups.len() {
            if paths.is_empty() || groups[index].0.is_disjoint(&paths) {
                index += 1;
            } else {
                let (other_paths, other_members) = groups.swap_remove(index);
                paths.extend(other_paths);
                members.extend(other_members);
            }
        }
        groups.push((paths, members));
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

/// Stage every extracted item under the builder's job directory
///
/// RAR volumes are grouped into sets by archive name, or by the members
/// they share when their names are obfuscated, and ordered by their
/// resolved part numbers before their entries are joined.
pub fn aggregate(
    builder: &mut TreeBuilder,
    extracted: Vec<Extracted>,
    options: &AggregateOptions,
) -> IngestResult<()> {
    let mut rar_sets: BTreeMap<String, Vec<RarVolumeInfo>> = BTreeMap::new();
    let mut unnamed = Vec::new();
    for item in extracted {
        match item {
            Extracted::Stored(file) => add_stored(builder, file)?,
            Extracted::SplitMkv(file) => add_split_mkv(builder, file)?,
            Extracted::SevenZip(set) => add_sevenzip(builder, set, options)?,
            Extracted::RarVolume(volume) => match named_rar_volume(&volume.name) {
                Some(name) => rar_sets.entry(name.archive).or_default().push(volume),
                None => unnamed.push(volume),
            },
        }
    }
    for (archive, volumes) in rar_sets {
        add_rar_set(builder, &archive, volumes, options)?;
    }
    if !unnamed.is_empty() {
        debug!("Grouping {} RAR volumes by content", unnamed.len());
    }
    for mut volumes in group_by_members(unnamed) {
        for volume in &mut volumes {
            volume.part_number = None;
        }
        let archive = volumes.first().map(|v| v.name.clone()).unwrap_or_default();
        add_rar_set(builder, &archive, volumes, options)?;
    }
    info!("Staged {} files", builder.file_count());
    Ok(())
}
