//! Entry node representation

use regex::Regex;

use crate::utils::glob_to_regex;

/// What an entry is, as far as browsing is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
    /// A file that opens as an archive of its own instead of being previewed
    NestedArchive,
}

impl EntryKind {
    /// Whether the node can own children
    pub fn is_folder(&self) -> bool {
        matches!(self, EntryKind::Folder)
    }

    /// Files and nested archives exist as real entries in the backend
    pub fn is_leaf(&self) -> bool {
        !self.is_folder()
    }
}

/// Handle to a node in an [`EntryTree`](super::EntryTree).
///
/// The generation makes handles go stale once their slot is freed, so a
/// handle kept across `clear()` never aliases a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(super) index: u32,
    pub(super) generation: u32,
}

/// One path segment within an archive
#[derive(Debug, Clone)]
pub struct EntryNode {
    /// Last path segment (not the full path)
    pub name: String,
    pub kind: EntryKind,
    /// Slash-separated path from the archive root; empty for the root
    pub full_path: String,
    /// Whether children have been fetched from the backend
    pub children_populated: bool,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
}

impl EntryNode {
    pub(super) fn new(name: String, kind: EntryKind, full_path: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            kind,
            full_path,
            children_populated: false,
            parent,
            children: Vec::new(),
        }
    }

    /// Parent handle; `None` only for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child handles in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Decides which file names denote nested archives
#[derive(Debug, Clone)]
pub struct NestedArchiveMatcher {
    patterns: Vec<Regex>,
}

impl Default for NestedArchiveMatcher {
    fn default() -> Self {
        Self::from_globs(&["*.vfsarc".to_string()])
            .expect("built-in nested archive glob is valid")
    }
}

impl NestedArchiveMatcher {
    /// Build from case-insensitive glob patterns like `*.vfsarc`
    pub fn from_globs(globs: &[String]) -> Result<Self, regex::Error> {
        let patterns = globs
            .iter()
            .map(|g| Regex::new(&glob_to_regex(g, false)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_nested_archive(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(name))
    }

    /// Classify the last segment of a path
    pub fn classify_leaf(&self, name: &str) -> EntryKind {
        if self.is_nested_archive(name) {
            EntryKind::NestedArchive
        } else {
            EntryKind::File
        }
    }
}
