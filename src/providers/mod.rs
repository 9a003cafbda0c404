//! Archive backends
//!
//! A backend performs list/extract/add/remove against one concrete archive
//! file. The navigator only talks to the [`ArchiveBackend`] trait, so backends
//! can be swapped without touching the tree or the credential logic:
//! - [`CliBackend`] shells out to `unzip` / `zip`
//! - [`ZipBackend`] works in-process on the `zip` crate

mod cli;
mod zip;

#[cfg(test)]
pub(crate) mod memory;

pub use cli::{CliBackend, CliTools};
pub use zip::ZipBackend;

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::config::{BackendConfig, BackendKind};

/// Error type for backend operations
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("No archive opened")]
    NotOpen,
    #[error("Entry not found: {0}")]
    EntryNotFound(String),
    #[error("Entry would extract outside the target directory: {0}")]
    UnsafeEntry(String),
    #[error("Password required or incorrect for {0}")]
    Password(String),
    #[error("{tool} exited with status {status}: {stderr}")]
    Tool {
        tool: String,
        status: i32,
        stderr: String,
    },
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<::zip::result::ZipError> for BackendError {
    fn from(e: ::zip::result::ZipError) -> Self {
        match e {
            ::zip::result::ZipError::Io(io) => BackendError::Io(io),
            ::zip::result::ZipError::FileNotFound => BackendError::EntryNotFound(String::new()),
            ::zip::result::ZipError::InvalidPassword => BackendError::Password(String::new()),
            other => BackendError::Archive(other.to_string()),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Information about a backend for display
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Display name (e.g., "unzip/zip", "zip-rs")
    pub name: String,
    /// Short description
    pub description: String,
    pub kind: BackendKind,
}

/// Capability set the navigator needs from an archive implementation.
///
/// Entry paths are archive-relative, slash separated. Directory entries, when
/// the format stores them, end with `/`.
pub trait ArchiveBackend: Send {
    /// Get backend information for display
    fn info(&self) -> &BackendInfo;

    /// Bind this instance to an archive file. Fails if the path does not
    /// exist or is not readable as an archive.
    fn open(&mut self, path: &Path) -> BackendResult<()>;

    /// Path of the opened archive, if any
    fn archive_path(&self) -> Option<&Path>;

    /// List entry paths, optionally only those starting with `prefix`.
    ///
    /// An empty list is the only failure signal: a wrong password, an
    /// unreadable archive and an empty archive all look the same here.
    fn list_entries(&self, prefix: Option<&str>) -> Vec<String>;

    /// Extract a single entry into a freshly created temporary directory and
    /// return the path of the extracted file.
    fn extract_entry_to_temp(&mut self, entry: &str) -> BackendResult<PathBuf>;

    /// Extract every entry into `dest`
    fn extract_all(&mut self, dest: &Path) -> BackendResult<()>;

    /// Add local files to the archive. `dest_in_archive` is the folder they
    /// should land in (empty for the archive root). Best effort: formats
    /// without directory support may flatten it.
    fn add_files(&mut self, files: &[PathBuf], dest_in_archive: &str) -> BackendResult<()>;

    /// Remove the given entries. May rewrite the whole archive.
    fn remove_entries(&mut self, entries: &[String]) -> BackendResult<()>;

    /// Set the password used by subsequent operations. Empty means none.
    fn set_password(&mut self, password: &str);

    /// Password currently set
    fn password(&self) -> &str;
}

/// Creates fresh backend instances (one per opened archive, nested ones included)
pub trait BackendFactory {
    fn create(&self) -> Box<dyn ArchiveBackend>;
}

impl<F> BackendFactory for F
where
    F: Fn() -> Box<dyn ArchiveBackend>,
{
    fn create(&self) -> Box<dyn ArchiveBackend> {
        self()
    }
}

/// Factory for the backend selected in the configuration
pub struct ConfiguredFactory {
    config: BackendConfig,
    temp_root: PathBuf,
}

impl ConfiguredFactory {
    pub fn new(config: BackendConfig, temp_root: PathBuf) -> Self {
        Self { config, temp_root }
    }
}

impl BackendFactory for ConfiguredFactory {
    fn create(&self) -> Box<dyn ArchiveBackend> {
        match self.config.kind {
            BackendKind::Cli => Box::new(CliBackend::new(
                CliTools::from_config(&self.config),
                self.temp_root.clone(),
            )),
            BackendKind::Zip => Box::new(ZipBackend::new(self.temp_root.clone())),
        }
    }
}

/// Password argument handling shared by backends: empty means "no password"
pub(crate) fn non_empty(password: &str) -> Option<&str> {
    if password.is_empty() { None } else { Some(password) }
}

/// Relative on-disk path for an entry name, or `None` when the name is
/// absolute or climbs out with `..`
pub(crate) fn enclosed_path(entry: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() { None } else { Some(out) }
}

/// Filter an entry list by prefix, preserving order
pub(crate) fn filter_prefix(entries: Vec<String>, prefix: Option<&str>) -> Vec<String> {
    match prefix {
        Some(p) if !p.is_empty() => entries.into_iter().filter(|e| e.starts_with(p)).collect(),
        _ => entries,
    }
}
