//! In-memory tree of archive entries
//!
//! Nodes live in an arena addressed by generational [`NodeId`]s. Parents own
//! their children through the child list; the parent link is only a handle
//! used for navigation and removal. Subtrees are disclosed lazily: navigation
//! merges one level at a time and marks a folder populated once its listing
//! has been merged.

mod entry;

pub use entry::{EntryKind, EntryNode, NestedArchiveMatcher, NodeId};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node is no longer part of the tree")]
    StaleNode,
    #[error("The archive root cannot be removed")]
    RootNotRemovable,
    #[error("Cannot add children to a {0:?} node")]
    NotAFolder(EntryKind),
    #[error("'{0}' already exists")]
    Exists(String),
}

pub type TreeResult<T> = Result<T, TreeError>;

/// Shape change announced to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeChange {
    /// The whole tree was discarded
    Reset,
    /// Children were (possibly) added somewhere under `parent`
    Inserted { parent: NodeId },
    /// A child subtree of `parent` was removed
    Removed { parent: NodeId },
}

/// Receives notifications around every mutation. Observers never see a
/// half-applied change: `begin_change` fires before the first write and
/// `end_change` after the last.
pub trait TreeObserver {
    fn begin_change(&mut self, _change: &TreeChange) {}
    fn end_change(&mut self, _change: &TreeChange) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    /// Materialize every segment of every path
    Full,
    /// Materialize only the first segment below the target
    Level,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<EntryNode>,
}

/// Hierarchical view of one archive's entries
pub struct EntryTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    matcher: NestedArchiveMatcher,
    observers: Vec<Box<dyn TreeObserver>>,
}

impl Default for EntryTree {
    fn default() -> Self {
        Self::new(NestedArchiveMatcher::default())
    }
}

impl std::fmt::Debug for EntryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryTree")
            .field("nodes", &self.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl EntryTree {
    pub fn new(matcher: NestedArchiveMatcher) -> Self {
        let root = EntryNode::new("/".to_string(), EntryKind::Folder, String::new(), None);
        Self {
            slots: vec![Slot { generation: 0, node: Some(root) }],
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
            matcher,
            observers: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn matcher(&self) -> &NestedArchiveMatcher {
        &self.matcher
    }

    pub fn add_observer(&mut self, observer: Box<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.node(self.root).map(|r| r.children.is_empty()).unwrap_or(true)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> TreeResult<&EntryNode> {
        self.node(id).ok_or(TreeError::StaleNode)
    }

    /// Full archive path of a node
    pub fn path_for(&self, id: NodeId) -> TreeResult<&str> {
        self.get(id).map(|n| n.full_path.as_str())
    }

    pub fn children(&self, id: NodeId) -> TreeResult<&[NodeId]> {
        self.get(id).map(|n| n.children.as_slice())
    }

    pub fn set_populated(&mut self, id: NodeId, populated: bool) -> TreeResult<()> {
        self.node_mut(id)
            .map(|n| n.children_populated = populated)
            .ok_or(TreeError::StaleNode)
    }

    /// Merge a flat path list under `target`, creating every missing segment.
    ///
    /// The paths are taken to be the complete listing below the folders they
    /// touch, so those folders end up populated.
    pub fn merge<S: AsRef<str>>(&mut self, paths: &[S], prefix: &str, target: Option<NodeId>) -> TreeResult<usize> {
        self.merge_with_depth(paths, prefix, target, Depth::Full)
    }

    /// Merge only the first segment below `target` of each path.
    ///
    /// Deeper segments are implied by an unpopulated folder and disclosed
    /// when that folder is expanded.
    pub fn merge_level<S: AsRef<str>>(&mut self, paths: &[S], prefix: &str, target: Option<NodeId>) -> TreeResult<usize> {
        self.merge_with_depth(paths, prefix, target, Depth::Level)
    }

    fn merge_with_depth<S: AsRef<str>>(
        &mut self,
        paths: &[S],
        prefix: &str,
        target: Option<NodeId>,
        depth: Depth,
    ) -> TreeResult<usize> {
        let target = target.unwrap_or(self.root);
        let kind = self.get(target)?.kind;
        if !kind.is_folder() {
            return Err(TreeError::NotAFolder(kind));
        }

        let change = TreeChange::Inserted { parent: target };
        self.notify_begin(&change);

        let mut created = 0;
        for entry in paths {
            let entry = entry.as_ref();
            if !entry.starts_with(prefix) {
                continue;
            }
            let rel = &entry[prefix.len()..];
            let explicit_dir = entry.ends_with('/');
            let parts: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
            let take = match depth {
                Depth::Full => parts.len(),
                Depth::Level => parts.len().min(1),
            };

            let mut cur = target;
            for (i, part) in parts.iter().take(take).enumerate() {
                let is_last = i + 1 == parts.len();
                let kind = if !is_last || explicit_dir {
                    EntryKind::Folder
                } else {
                    self.matcher.classify_leaf(part)
                };

                cur = match self.find_child(cur, part) {
                    Some(existing) => {
                        if kind.is_folder()
                            && let Some(node) = self.node_mut(existing)
                        {
                            node.kind = EntryKind::Folder;
                        }
                        existing
                    }
                    None => {
                        created += 1;
                        self.insert_child(cur, part, kind)
                    }
                };

                if depth == Depth::Full
                    && kind.is_folder()
                    && let Some(node) = self.node_mut(cur)
                {
                    node.children_populated = true;
                }
            }
        }

        self.notify_end(&change);
        Ok(created)
    }

    /// Create an empty, already populated folder under `parent`
    pub fn insert_folder(&mut self, parent: NodeId, name: &str) -> TreeResult<NodeId> {
        let kind = self.get(parent)?.kind;
        if !kind.is_folder() {
            return Err(TreeError::NotAFolder(kind));
        }
        if self.find_child(parent, name).is_some() {
            return Err(TreeError::Exists(name.to_string()));
        }

        let change = TreeChange::Inserted { parent };
        self.notify_begin(&change);
        let id = self.insert_child(parent, name, EntryKind::Folder);
        if let Some(node) = self.node_mut(id) {
            node.children_populated = true;
        }
        self.notify_end(&change);
        Ok(id)
    }

    /// Walk `path` segment by segment from `start` (root if `None`).
    /// Never triggers population.
    pub fn find_by_path(&self, path: &str, start: Option<NodeId>) -> Option<NodeId> {
        let mut cur = start.unwrap_or(self.root);
        self.node(cur)?;
        for part in path.split('/').filter(|s| !s.is_empty()) {
            cur = self.find_child(cur, part)?;
        }
        Some(cur)
    }

    /// Drop every node except the root
    pub fn clear(&mut self) {
        let change = TreeChange::Reset;
        self.notify_begin(&change);

        let children = match self.node_mut(self.root) {
            Some(root) => {
                root.children_populated = false;
                std::mem::take(&mut root.children)
            }
            None => Vec::new(),
        };
        for child in children {
            self.free_subtree(child);
        }

        self.notify_end(&change);
    }

    /// Detach `id` from its parent and release it with all descendants
    pub fn remove_subtree(&mut self, id: NodeId) -> TreeResult<()> {
        let node = self.get(id)?;
        let Some(parent) = node.parent else {
            return Err(TreeError::RootNotRemovable);
        };

        let change = TreeChange::Removed { parent };
        self.notify_begin(&change);
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != id);
        }
        self.free_subtree(id);
        self.notify_end(&change);
        Ok(())
    }

    /// Archive paths of every file and nested archive in the subtree.
    /// A leaf yields just its own path; folders contribute nothing themselves.
    pub fn leaf_paths(&self, id: NodeId) -> TreeResult<Vec<String>> {
        self.get(id)?;
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.node(cur) else { continue };
            if node.kind.is_leaf() {
                out.push(node.full_path.clone());
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        Ok(out)
    }

    /// Folders in the subtree (including `id`) whose children were never fetched
    pub fn unpopulated_folders(&self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        self.get(id)?;
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.node(cur) else { continue };
            if node.kind.is_folder() {
                if !node.children_populated {
                    out.push(cur);
                }
                stack.extend(node.children.iter().rev());
            }
        }
        Ok(out)
    }

    /// Depth-first (depth, node) pairs below `id`, in child order
    pub fn descendants(&self, id: NodeId) -> Vec<(usize, NodeId)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, NodeId)> = match self.node(id) {
            Some(node) => node.children.iter().rev().map(|c| (0, *c)).collect(),
            None => return out,
        };
        while let Some((depth, cur)) = stack.pop() {
            let Some(node) = self.node(cur) else { continue };
            out.push((depth, cur));
            stack.extend(node.children.iter().rev().map(|c| (depth + 1, *c)));
        }
        out
    }

    fn node(&self, id: NodeId) -> Option<&EntryNode> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut EntryNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.node(*c).is_some_and(|n| n.name == name))
    }

    fn insert_child(&mut self, parent: NodeId, name: &str, kind: EntryKind) -> NodeId {
        let full_path = match self.node(parent) {
            Some(p) if !p.full_path.is_empty() => format!("{}/{}", p.full_path, name),
            _ => name.to_string(),
        };
        let node = EntryNode::new(name.to_string(), kind, full_path, Some(parent));

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId { index, generation: slot.generation }
            }
            None => {
                self.slots.push(Slot { generation: 0, node: Some(node) });
                NodeId { index: (self.slots.len() - 1) as u32, generation: 0 }
            }
        };

        if let Some(p) = self.node_mut(parent) {
            p.children.push(id);
        }
        id
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(slot) = self.slots.get_mut(cur.index as usize) else { continue };
            if slot.generation != cur.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(cur.index);
                stack.extend(node.children);
            }
        }
    }

    fn notify_begin(&mut self, change: &TreeChange) {
        for observer in &mut self.observers {
            observer.begin_change(change);
        }
    }

    fn notify_end(&mut self, change: &TreeChange) {
        for observer in &mut self.observers {
            observer.end_change(change);
        }
    }
}
