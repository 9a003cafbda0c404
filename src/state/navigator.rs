//! Navigation controller
//!
//! Owns the one active backend, the entry tree built from it, the session's
//! credentials and the breadcrumb trail. Every operation is a synchronous call
//! from the presentation layer; user cancellation comes back as
//! [`Outcome::Cancelled`] rather than an error.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::credentials::{
    AbandonReason, CredentialResolver, CredentialStore, PasswordPrompt, PromptRequest, Resolution, ResolverSettings,
    listing,
};
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::manifest::Manifest;
use crate::providers::{ArchiveBackend, BackendError, BackendFactory, BackendInfo, ConfiguredFactory};
use crate::tree::{EntryKind, EntryTree, NestedArchiveMatcher, NodeId, TreeError};
use crate::utils::{display_name, join_archive_path, last_segment, unique_temp_dir};

/// Result of a navigation request that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The request was carried out
    Done,
    /// Nothing needed doing (already populated, already at the top, ...)
    Unchanged,
    /// The user dismissed a password prompt; no state changed
    Cancelled,
    /// A file entry was extracted for viewing
    Extracted(PathBuf),
}

/// An archive the navigator has open or can return to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// Where the backend reads it from (a temp file for nested archives)
    pub path: PathBuf,
    /// Key for the credential cache
    pub identity: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct NavigatorSettings {
    /// Reserved entry holding the metadata manifest
    pub manifest_entry: String,
    /// File written to persist otherwise empty folders
    pub placeholder_name: String,
    pub temp_root: PathBuf,
    pub resolver: ResolverSettings,
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl NavigatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            manifest_entry: config.general.manifest_entry.clone(),
            placeholder_name: config.general.placeholder_name.clone(),
            temp_root: config.general.temp_root(),
            resolver: ResolverSettings {
                try_without_password: config.credentials.try_without_password,
            },
        }
    }
}

pub struct Navigator {
    factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn ArchiveBackend>>,
    tree: EntryTree,
    credentials: CredentialStore,
    breadcrumbs: Vec<String>,
    active: Option<ArchiveRecord>,
    /// Archives we descended from, outermost first
    parents: Vec<ArchiveRecord>,
    manifest: Option<Manifest>,
    settings: NavigatorSettings,
}

impl Navigator {
    pub fn new(factory: Box<dyn BackendFactory>, matcher: NestedArchiveMatcher, settings: NavigatorSettings) -> Self {
        Self {
            factory,
            backend: None,
            tree: EntryTree::new(matcher),
            credentials: CredentialStore::new(),
            breadcrumbs: Vec::new(),
            active: None,
            parents: Vec::new(),
            manifest: None,
            settings,
        }
    }

    /// Navigator using the backend and conventions selected in `config`
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let matcher = NestedArchiveMatcher::from_globs(&config.general.nested_archive_patterns)
            .map_err(|e| AppError::Config(format!("invalid nested archive pattern: {}", e)))?;
        let settings = NavigatorSettings::from_config(config);
        let factory = ConfiguredFactory::new(config.backend.clone(), settings.temp_root.clone());
        Ok(Self::new(Box::new(factory), matcher, settings))
    }

    pub fn tree(&self) -> &EntryTree {
        &self.tree
    }

    /// Mutable tree access, for registering observers
    pub fn tree_mut(&mut self) -> &mut EntryTree {
        &mut self.tree
    }

    pub fn breadcrumbs(&self) -> &[String] {
        &self.breadcrumbs
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn active_archive(&self) -> Option<&ArchiveRecord> {
        self.active.as_ref()
    }

    pub fn backend_info(&self) -> Option<&BackendInfo> {
        self.backend.as_ref().map(|b| b.info())
    }

    /// How deep into nested archives we are; 0 at a top-level archive
    pub fn depth(&self) -> usize {
        self.parents.len()
    }

    /// Breadcrumbs joined for display, with a marker when the active archive
    /// was unlocked with a password
    pub fn status_line(&self) -> String {
        let mut line = self.breadcrumbs.join(" > ");
        let locked = self
            .active
            .as_ref()
            .and_then(|a| self.credentials.cached(&a.identity))
            .is_some_and(|pw| !pw.is_empty());
        if locked {
            line.push_str(" [locked]");
        }
        line
    }

    /// Open a top-level archive, replacing whatever was open.
    ///
    /// An abandoned password prompt leaves the previous archive active.
    pub fn open_archive(&mut self, path: &Path, prompt: &mut dyn PasswordPrompt) -> AppResult<Outcome> {
        let record = ArchiveRecord {
            path: path.to_path_buf(),
            identity: path.to_string_lossy().into_owned(),
            display_name: display_name(path),
        };
        let Some((backend, entries)) = self.open_and_list(&record, prompt, self.settings.resolver)? else {
            return Ok(Outcome::Cancelled);
        };

        info!("Opened {}", record.display_name);
        self.parents.clear();
        self.breadcrumbs = vec![record.display_name.clone()];
        self.activate(backend, record, &entries)?;
        Ok(Outcome::Done)
    }

    /// Disclose the children of a folder. No-op once populated.
    pub fn expand(&mut self, node: NodeId) -> AppResult<Outcome> {
        let n = self.tree.get(node)?;
        if !n.kind.is_folder() {
            return Err(AppError::InvalidTarget(format!("{} is not a folder", n.full_path)));
        }
        if n.children_populated {
            return Ok(Outcome::Unchanged);
        }
        let prefix = folder_prefix(&n.full_path);

        let backend = self.backend.as_ref().ok_or(AppError::NoArchive)?;
        let entries = self.visible_entries(backend.list_entries(Some(&prefix)));
        debug!("expanding '{}': {} entries", prefix, entries.len());
        self.tree.merge_level(&entries, &prefix, Some(node))?;
        self.tree.set_populated(node, true)?;
        Ok(Outcome::Done)
    }

    /// Activate a node: folders expand, nested archives are entered and
    /// files are extracted for viewing
    pub fn open_entry(&mut self, node: NodeId, prompt: &mut dyn PasswordPrompt) -> AppResult<Outcome> {
        let kind = self.tree.get(node)?.kind;
        match kind {
            EntryKind::Folder => self.expand(node),
            EntryKind::NestedArchive => self.open_nested(node, prompt),
            EntryKind::File => {
                let entry = self.tree.path_for(node)?.to_string();
                Ok(match self.extract_guarded(&entry, prompt)? {
                    Some(path) => Outcome::Extracted(path),
                    None => Outcome::Cancelled,
                })
            }
        }
    }

    /// Descend into a nested archive entry of the current archive.
    ///
    /// The extracted file is listed as-is first; only an archive that lists
    /// nothing without a password goes through the credential sequence.
    pub fn open_nested(&mut self, node: NodeId, prompt: &mut dyn PasswordPrompt) -> AppResult<Outcome> {
        let n = self.tree.get(node)?;
        if n.kind != EntryKind::NestedArchive {
            return Err(AppError::InvalidTarget(format!("{} is not an archive", n.full_path)));
        }
        let entry = n.full_path.clone();
        let parent = self.active.clone().ok_or(AppError::NoArchive)?;

        let Some(extracted) = self.extract_guarded(&entry, prompt)? else {
            return Ok(Outcome::Cancelled);
        };
        let record = ArchiveRecord {
            path: extracted,
            identity: format!("{}:{}", parent.identity, entry),
            display_name: last_segment(&entry).to_string(),
        };
        let Some((backend, entries)) = self.open_and_list(&record, prompt, self.reopen_settings())? else {
            return Ok(Outcome::Cancelled);
        };

        info!("Entered {} inside {}", entry, parent.display_name);
        self.breadcrumbs.push(format!("{}:{}", parent.display_name, entry));
        self.parents.push(parent);
        self.activate(backend, record, &entries)?;
        Ok(Outcome::Done)
    }

    /// Go back to the archive the current one was entered from.
    ///
    /// The parent is reopened from its recorded path, so its tree starts
    /// again from the root listing.
    pub fn leave_nested(&mut self, prompt: &mut dyn PasswordPrompt) -> AppResult<Outcome> {
        let Some(parent) = self.parents.last().cloned() else {
            return Ok(Outcome::Unchanged);
        };
        let Some((backend, entries)) = self.open_and_list(&parent, prompt, self.reopen_settings())? else {
            return Ok(Outcome::Cancelled);
        };

        info!("Back in {}", parent.display_name);
        self.parents.pop();
        self.breadcrumbs.pop();
        self.activate(backend, parent, &entries)?;
        Ok(Outcome::Done)
    }

    /// Delete a node's entries from the archive, then from the tree.
    ///
    /// On backend failure the tree is left exactly as it was.
    pub fn remove(&mut self, node: NodeId) -> AppResult<Outcome> {
        let n = self.tree.get(node)?;
        if n.parent().is_none() {
            return Err(TreeError::RootNotRemovable.into());
        }
        let kind = n.kind;
        let full_path = n.full_path.clone();

        let backend = self.backend.as_mut().ok_or(AppError::NoArchive)?;
        let paths = if kind.is_leaf() {
            vec![full_path.clone()]
        } else {
            // Entries below unexpanded folders exist only in the backend.
            // Directory entries are never sent.
            let mut paths = self.tree.leaf_paths(node)?;
            for entry in backend.list_entries(Some(&folder_prefix(&full_path))) {
                if !entry.ends_with('/') && !paths.contains(&entry) {
                    paths.push(entry);
                }
            }
            paths
        };

        if paths.is_empty() {
            debug!("'{}' has no archive entries, removing locally", full_path);
        } else {
            backend
                .remove_entries(&paths)
                .map_err(|e| AppError::backend("remove", e))?;
            info!("Removed {} entries for '{}'", paths.len(), full_path);
        }
        self.tree.remove_subtree(node)?;
        Ok(Outcome::Done)
    }

    /// Create an empty folder under `parent` and try to persist it with a
    /// placeholder file
    pub fn add_folder(&mut self, parent: NodeId, name: &str) -> AppResult<NodeId> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(AppError::InvalidTarget(format!("'{}' is not a valid folder name", name)));
        }
        let p = self.tree.get(parent)?;
        if !p.kind.is_folder() {
            return Err(TreeError::NotAFolder(p.kind).into());
        }
        if !p.children_populated {
            self.expand(parent)?;
        }

        let id = self.tree.insert_folder(parent, name)?;
        let folder = self.tree.path_for(id)?.to_string();
        if let Err(e) = self.store_placeholder(&folder) {
            warn!("Folder '{}' exists only until the archive is reopened: {}", folder, e);
        }
        Ok(id)
    }

    /// Add local files under a folder node (the root when `None`)
    pub fn add_files(&mut self, files: &[PathBuf], target: Option<NodeId>) -> AppResult<Outcome> {
        if files.is_empty() {
            return Ok(Outcome::Unchanged);
        }
        let target = target.unwrap_or(self.tree.root());
        let t = self.tree.get(target)?;
        if !t.kind.is_folder() {
            return Err(TreeError::NotAFolder(t.kind).into());
        }
        let dest = t.full_path.clone();
        let populated = t.children_populated;

        let backend = self.backend.as_mut().ok_or(AppError::NoArchive)?;
        backend.add_files(files, &dest).map_err(|e| AppError::backend("add", e))?;
        info!("Added {} files to '{}'", files.len(), dest);

        // An unpopulated folder picks them up on its first expand
        if populated {
            let names: Vec<String> = files
                .iter()
                .map(|f| join_archive_path(&dest, &display_name(f)))
                .collect();
            let names = self.visible_entries(names);
            self.tree.merge_level(&names, &folder_prefix(&dest), Some(target))?;
        }
        Ok(Outcome::Done)
    }

    /// Extract the whole active archive into `dest`
    pub fn extract_all(&mut self, dest: &Path) -> AppResult<Outcome> {
        let backend = self.backend.as_mut().ok_or(AppError::NoArchive)?;
        backend.extract_all(dest).map_err(|e| AppError::backend("extract", e))?;
        info!("Extracted archive to {}", dest.display());
        Ok(Outcome::Done)
    }

    /// Open `record` with a fresh backend and list it through the resolver.
    /// `None` means the user cancelled.
    fn open_and_list(
        &mut self,
        record: &ArchiveRecord,
        prompt: &mut dyn PasswordPrompt,
        resolver: ResolverSettings,
    ) -> AppResult<Option<(Box<dyn ArchiveBackend>, Vec<String>)>> {
        let mut backend = self.factory.create();
        backend.open(&record.path).map_err(|e| AppError::ArchiveOpen {
            path: record.path.clone(),
            reason: e.to_string(),
        })?;

        let request = PromptRequest::open(&record.display_name);
        let resolution = CredentialResolver::new(&mut self.credentials, prompt, resolver)
            .resolve(backend.as_mut(), &record.identity, &request, listing);
        match resolution {
            Resolution::Resolved { value, by } => {
                debug!("{} unlocked via {:?}", record.display_name, by);
                Ok(Some((backend, value)))
            }
            Resolution::Abandoned(AbandonReason::Cancelled) => Ok(None),
            Resolution::Abandoned(AbandonReason::Rejected) => Err(AppError::PasswordRejected {
                archive: record.display_name.clone(),
            }),
        }
    }

    /// Resolver settings for nested archives and for parents being returned
    /// to: an attempt without a password comes before anything else
    fn reopen_settings(&self) -> ResolverSettings {
        ResolverSettings { try_without_password: true }
    }

    /// Make `backend` the active one and rebuild the tree from its root listing
    fn activate(&mut self, mut backend: Box<dyn ArchiveBackend>, record: ArchiveRecord, entries: &[String]) -> AppResult<()> {
        let visible = self.visible_entries(entries.to_vec());
        self.tree.clear();
        self.tree.merge_level(&visible, "", None)?;
        self.tree.set_populated(self.tree.root(), true)?;

        self.manifest = Some(Manifest::load_or_create(
            backend.as_mut(),
            &self.settings.manifest_entry,
            &self.settings.temp_root,
        ));
        self.backend = Some(backend);
        self.active = Some(record);
        Ok(())
    }

    /// Extract an entry of the active archive, falling back to the credential
    /// sequence when the current password can't pull it out.
    /// `None` means the user cancelled.
    fn extract_guarded(&mut self, entry: &str, prompt: &mut dyn PasswordPrompt) -> AppResult<Option<PathBuf>> {
        let backend = self.backend.as_mut().ok_or(AppError::NoArchive)?;
        let active = self.active.as_ref().ok_or(AppError::NoArchive)?;

        match backend.extract_entry_to_temp(entry) {
            Ok(path) => return Ok(Some(path)),
            Err(e @ (BackendError::EntryNotFound(_) | BackendError::NotOpen | BackendError::UnsafeEntry(_))) => {
                return Err(AppError::backend("extract", e));
            }
            Err(e) => debug!("extracting {} failed ({}), trying credentials", entry, e),
        }

        let request = PromptRequest::extract(&active.display_name, entry);
        let resolution = CredentialResolver::new(&mut self.credentials, prompt, self.settings.resolver).resolve(
            backend.as_mut(),
            &active.identity,
            &request,
            |b| b.extract_entry_to_temp(entry).ok(),
        );
        match resolution {
            Resolution::Resolved { value, .. } => Ok(Some(value)),
            Resolution::Abandoned(AbandonReason::Cancelled) => Ok(None),
            Resolution::Abandoned(AbandonReason::Rejected) => Err(AppError::PasswordRejected {
                archive: active.display_name.clone(),
            }),
        }
    }

    /// Write `<folder>/<placeholder>` into the archive
    fn store_placeholder(&mut self, folder: &str) -> AppResult<()> {
        let backend = self.backend.as_mut().ok_or(AppError::NoArchive)?;
        let file = unique_temp_dir(&self.settings.temp_root)?.join(&self.settings.placeholder_name);
        fs::write(&file, b"")?;
        backend
            .add_files(&[file], folder)
            .map_err(|e| AppError::backend("add", e))
    }

    /// Drop reserved entries from a listing: the manifest at the root, and
    /// placeholders, which become the directory entry they stand for
    fn visible_entries(&self, entries: Vec<String>) -> Vec<String> {
        let placeholder = self.settings.placeholder_name.as_str();
        entries
            .into_iter()
            .filter(|e| *e != self.settings.manifest_entry && e != placeholder)
            .map(|e| match e.strip_suffix(placeholder) {
                Some(dir) if dir.ends_with('/') => dir.to_string(),
                _ => e,
            })
            .collect()
    }
}

/// Listing prefix for everything below a folder path
fn folder_prefix(full_path: &str) -> String {
    if full_path.is_empty() {
        String::new()
    } else {
        format!("{}/", full_path)
    }
}
