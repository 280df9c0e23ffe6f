//! In-memory index store

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{IndexStore, PendingBatch};
use crate::error::{IndexError, IndexResult};
use crate::model::{FileLayout, LogicalNode, NodeId};

#[derive(Debug)]
struct State {
    nodes: HashMap<NodeId, LogicalNode>,
    children: HashMap<NodeId, BTreeMap<String, NodeId>>,
    layouts: HashMap<NodeId, FileLayout>,
}

impl State {
    fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children
            .get(&parent)
            .and_then(|names| names.get(name))
            .copied()
    }

    fn validate(&self, batch: &PendingBatch) -> IndexResult<()> {
        let mut staged_dirs = HashSet::new();
        let mut staged_names = HashSet::new();

        for entry in batch.entries() {
            let node = &entry.node;
            let parent = node.parent.ok_or(IndexError::InvalidNode(node.id))?;

            let parent_is_dir = staged_dirs.contains(&parent)
                || self.nodes.get(&parent).is_some_and(LogicalNode::is_directory);
            if !parent_is_dir {
                return Err(IndexError::UnknownParent(parent));
            }

            if self.nodes.contains_key(&node.id)
                || self.child_named(parent, &node.name).is_some()
                || !staged_names.insert((parent, node.name.clone()))
            {
                return Err(IndexError::NodeExists {
                    parent,
                    name: node.name.clone(),
                });
            }

            match (&entry.layout, node.kind.is_file()) {
                (Some(layout), true) => {
                    layout.validate(node.size.unwrap_or_default())?;
                }
                (None, false) => {
                    staged_dirs.insert(node.id);
                }
                _ => return Err(IndexError::InvalidNode(node.id)),
            }
        }
        Ok(())
    }

    fn collect_subtree(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        if let Some(children) = self.children.get(&id) {
            for child in children.values() {
                self.collect_subtree(*child, out);
            }
        }
    }
}

/// Index store kept in process memory
///
/// Commits validate the whole batch before applying any of it.
#[derive(Debug)]
pub struct MemoryIndexStore {
    state: RwLock<State>,
}

impl Default for MemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndexStore {
    /// Store holding only the root directory
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, LogicalNode::root());
        Self {
            state: RwLock::new(State {
                nodes,
                children: HashMap::new(),
                layouts: HashMap::new(),
            }),
        }
    }

    /// Number of nodes including the root
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Number of stored layouts
    pub fn layout_count(&self) -> usize {
        self.state.read().layouts.len()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn find_child(&self, parent: NodeId, name: &str) -> IndexResult<Option<LogicalNode>> {
        let state = self.state.read();
        Ok(state
            .child_named(parent, name)
            .and_then(|id| state.nodes.get(&id))
            .cloned())
    }

    async fn get(&self, id: NodeId) -> IndexResult<Option<LogicalNode>> {
        Ok(self.state.read().nodes.get(&id).cloned())
    }

    async fn children(&self, parent: NodeId) -> IndexResult<Vec<LogicalNode>> {
        let state = self.state.read();
        Ok(state
            .children
            .get(&parent)
            .map(|names| {
                names
                    .values()
                    .filter_map(|id| state.nodes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn layout(&self, id: NodeId) -> IndexResult<Option<FileLayout>> {
        Ok(self.state.read().layouts.get(&id).cloned())
    }

    async fn commit(&self, batch: PendingBatch) -> IndexResult<()> {
        let mut state = self.state.write();
        state.validate(&batch)?;

        let count = batch.len();
        for entry in batch.into_entries() {
            let node = entry.node;
            if let Some(parent) = node.parent {
                state
                    .children
                    .entry(parent)
                    .or_default()
                    .insert(node.name.clone(), node.id);
            }
            if let Some(layout) = entry.layout {
                state.layouts.insert(node.id, layout);
            }
            state.nodes.insert(node.id, node);
        }
        drop(state);

        debug!("Committed {} index nodes", count);
        Ok(())
    }

    async fn delete(&self, id: NodeId) -> IndexResult<usize> {
        if id == NodeId::ROOT {
            return Err(IndexError::InvalidNode(id));
        }
        let mut state = self.state.write();
        let Some(node) = state.nodes.get(&id).cloned() else {
            return Err(IndexError::NodeNotFound(id));
        };

        let mut doomed = Vec::new();
        state.collect_subtree(id, &mut doomed);
        for victim in &doomed {
            state.nodes.remove(victim);
            state.layouts.remove(victim);
            state.children.remove(victim);
        }
        if let Some(parent) = node.parent
            && let Some(siblings) = state.children.get_mut(&parent)
        {
            siblings.remove(&node.name);
        }
        Ok(doomed.len())
    }
}
