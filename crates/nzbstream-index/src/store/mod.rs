//! Persistence seam for nodes and layouts
//!
//! Ingest stages everything it produces in a [`PendingBatch`] and hands it
//! to [`IndexStore::commit`] once, so readers never see a partial tree.

mod memory;

pub use memory::MemoryIndexStore;

use async_trait::async_trait;
use tracing::debug;

use crate::error::IndexResult;
use crate::model::{FileLayout, LogicalNode, NodeId};

/// Node plus layout staged for commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Node to create
    pub node: LogicalNode,
    /// Layout for file nodes, `None` for directories
    pub layout: Option<FileLayout>,
}

/// Everything one ingest unit will create, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    entries: Vec<PendingEntry>,
}

impl PendingBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a directory
    pub fn push_directory(&mut self, node: LogicalNode) {
        self.entries.push(PendingEntry { node, layout: None });
    }

    /// Stage a file with its layout
    pub fn push_file(&mut self, node: LogicalNode, layout: FileLayout) {
        self.entries.push(PendingEntry {
            node,
            layout: Some(layout),
        });
    }

    /// Staged entries in creation order
    pub fn entries(&self) -> &[PendingEntry] {
        &self.entries
    }

    /// Consume into staged entries
    pub fn into_entries(self) -> Vec<PendingEntry> {
        self.entries
    }

    /// Number of staged nodes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Staged file nodes
    pub fn files(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter().filter(|entry| entry.layout.is_some())
    }

    /// Drop everything without writing
    pub fn discard(self) {
        if !self.entries.is_empty() {
            debug!("Discarding {} uncommitted index nodes", self.entries.len());
        }
    }
}

/// Transactional node and layout storage
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Child of `parent` named `name`
    async fn find_child(&self, parent: NodeId, name: &str) -> IndexResult<Option<LogicalNode>>;

    /// Node by id
    async fn get(&self, id: NodeId) -> IndexResult<Option<LogicalNode>>;

    /// Children of `parent`, ordered by name
    async fn children(&self, parent: NodeId) -> IndexResult<Vec<LogicalNode>>;

    /// Layout of a file node
    async fn layout(&self, id: NodeId) -> IndexResult<Option<FileLayout>>;

    /// Create every staged node and layout, or none of them
    async fn commit(&self, batch: PendingBatch) -> IndexResult<()>;

    /// Remove a node, its descendants and their layouts together
    ///
    /// Returns the number of nodes removed.
    async fn delete(&self, id: NodeId) -> IndexResult<usize>;
}

/// Walk `path` down from the root
pub async fn find_path<S>(store: &S, path: &[&str]) -> IndexResult<Option<LogicalNode>>
where
    S: IndexStore + ?Sized,
{
    let mut current = match store.get(NodeId::ROOT).await? {
        Some(root) => root,
        None => return Ok(None),
    };
    for name in path {
        match store.find_child(current.id, name).await? {
            Some(child) => current = child,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}
