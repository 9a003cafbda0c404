//! Per-archive metadata manifest
//!
//! Every archive carries a small JSON record at a reserved entry path. When the
//! entry is missing on open, a default record is synthesized and written back
//! so the archive has one from then on.

use std::fs;
use std::path::Path;

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::providers::{ArchiveBackend, BackendError};
use crate::utils::unique_temp_dir;

pub const DEFAULT_VERSION: &str = "1.0";
pub const NEW_TAG: &str = "new";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

impl Default for Manifest {
    /// Record for an archive seen for the first time, stamped now
    fn default() -> Self {
        Self {
            version: default_version(),
            created: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            tags: vec![NEW_TAG.to_string()],
        }
    }
}

impl Manifest {
    /// Parse manifest JSON. Anything unreadable degrades to an empty record
    /// with the default version.
    pub fn parse(content: &str) -> Self {
        match serde_json::from_str(content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Ignoring unreadable manifest: {}", e);
                Self {
                    version: default_version(),
                    created: String::new(),
                    tags: Vec::new(),
                }
            }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Human-readable summary, one field per line
    pub fn summary(&self) -> String {
        format!(
            "Version: {}\nCreated: {}\nTags: {}",
            self.version,
            self.created,
            self.tags.join(", ")
        )
    }

    /// Read the manifest at `entry`, creating and persisting a default one if
    /// the archive has none. Write-back is best effort.
    pub fn load_or_create(backend: &mut dyn ArchiveBackend, entry: &str, temp_root: &Path) -> Self {
        match backend.extract_entry_to_temp(entry) {
            Ok(path) => match fs::read_to_string(&path) {
                Ok(content) => return Self::parse(&content),
                Err(e) => {
                    warn!("Could not read extracted manifest {}: {}", path.display(), e);
                    return Self::default();
                }
            },
            Err(BackendError::EntryNotFound(_)) => {
                debug!("No manifest at {}, creating one", entry);
            }
            Err(e) => {
                warn!("Could not extract manifest: {}", e);
                return Self::default();
            }
        }

        let manifest = Self::default();
        if let Err(e) = manifest.write_back(backend, entry, temp_root) {
            warn!("Could not store manifest in archive: {}", e);
        } else {
            info!("Stored new manifest as {}", entry);
        }
        manifest
    }

    fn write_back(&self, backend: &mut dyn ArchiveBackend, entry: &str, temp_root: &Path) -> Result<(), BackendError> {
        let file = unique_temp_dir(temp_root)?.join(entry);
        fs::write(&file, self.to_json())?;
        backend.add_files(&[file], "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::{Call, MemArchive, MemoryBackend, SharedStore};

    const ENTRY: &str = ".manifest.json";

    #[test]
    fn test_parse_full_record() {
        let m = Manifest::parse(r#"{"version":"2.1","created":"2024-03-01T10:00:00","tags":["a","b"]}"#);
        assert_eq!(m.version, "2.1");
        assert_eq!(m.created, "2024-03-01T10:00:00");
        assert_eq!(m.tags, vec!["a", "b"]);
        assert_eq!(m.summary(), "Version: 2.1\nCreated: 2024-03-01T10:00:00\nTags: a, b");
    }

    #[test]
    fn test_parse_missing_fields() {
        let m = Manifest::parse(r#"{"tags":["x"]}"#);
        assert_eq!(m.version, DEFAULT_VERSION);
        assert_eq!(m.created, "");
        assert_eq!(m.tags, vec!["x"]);
    }

    #[test]
    fn test_parse_garbage() {
        let m = Manifest::parse("not json");
        assert_eq!(m.version, DEFAULT_VERSION);
        assert!(m.created.is_empty());
        assert!(m.tags.is_empty());
    }

    #[test]
    fn test_default_is_new() {
        let m = Manifest::default();
        assert_eq!(m.tags, vec![NEW_TAG]);
        assert!(chrono::DateTime::parse_from_rfc3339(&m.created).is_ok());
    }

    #[test]
    fn test_load_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        let path = store.insert(
            "/m.vfsarc",
            MemArchive::new().file(ENTRY, br#"{"version":"3","created":"c","tags":[]}"#),
        );
        let mut backend = MemoryBackend::new(store.clone());
        backend.open(&path).unwrap();

        let m = Manifest::load_or_create(&mut backend, ENTRY, tmp.path());
        assert_eq!(m.version, "3");
        assert!(!store.calls().iter().any(|c| matches!(c, Call::Add { .. })));
    }

    #[test]
    fn test_missing_manifest_is_written_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        let path = store.insert("/m.vfsarc", MemArchive::new().file("a.txt", b"a"));
        let mut backend = MemoryBackend::new(store.clone());
        backend.open(&path).unwrap();

        let m = Manifest::load_or_create(&mut backend, ENTRY, tmp.path());
        assert_eq!(m.tags, vec![NEW_TAG]);
        assert!(store.archive(&path).unwrap().names().contains(&ENTRY.to_string()));

        // second open reads what was stored
        let again = Manifest::load_or_create(&mut backend, ENTRY, tmp.path());
        assert_eq!(again, m);
    }

    #[test]
    fn test_write_back_failure_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path());
        let path = store.insert("/m.vfsarc", MemArchive::new().file("a.txt", b"a"));
        store.lock().fail_add = true;
        let mut backend = MemoryBackend::new(store.clone());
        backend.open(&path).unwrap();

        let m = Manifest::load_or_create(&mut backend, ENTRY, tmp.path());
        assert_eq!(m.version, DEFAULT_VERSION);
        assert_eq!(store.archive(&path).unwrap().names(), vec!["a.txt"]);
    }
}
