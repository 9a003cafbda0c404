//! In-memory backend used by the tests
//!
//! Archives live in a shared store keyed by path, so a nested archive
//! "extracted" by one backend instance can be opened by a fresh one, the way
//! a real extracted file would be. Every call is recorded for assertions.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ArchiveBackend, BackendError, BackendInfo, BackendResult, enclosed_path, filter_prefix};
use crate::config::BackendKind;
use crate::utils::{display_name, join_archive_path, unique_temp_dir};

#[derive(Debug, Clone)]
pub enum MemEntry {
    File(Vec<u8>),
    Dir,
    Archive(MemArchive),
}

#[derive(Debug, Clone, Default)]
pub struct MemArchive {
    pub password: Option<String>,
    pub entries: Vec<(String, MemEntry)>,
    /// Entries encrypted with their own password; listing is unaffected
    pub entry_passwords: HashMap<String, String>,
}

impl MemArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.entries.push((path.to_string(), MemEntry::File(data.to_vec())));
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.entries.push((path.to_string(), MemEntry::Dir));
        self
    }

    pub fn archive(mut self, path: &str, inner: MemArchive) -> Self {
        self.entries.push((path.to_string(), MemEntry::Archive(inner)));
        self
    }

    pub fn entry_password(mut self, path: &str, password: &str) -> Self {
        self.entry_passwords.insert(path.to_string(), password.to_string());
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    fn unlocked_by(&self, password: &str) -> bool {
        match &self.password {
            None => true,
            Some(pw) => pw == password,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(PathBuf),
    List { prefix: Option<String>, password: String },
    Extract { entry: String, password: String },
    ExtractAll,
    Add { names: Vec<String>, dest: String },
    Remove(Vec<String>),
}

#[derive(Debug, Default)]
pub struct MemStore {
    archives: HashMap<PathBuf, MemArchive>,
    calls: Vec<Call>,
    temp_root: PathBuf,
    pub fail_remove: bool,
    pub fail_add: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SharedStore(Arc<Mutex<MemStore>>);

impl SharedStore {
    pub fn new(temp_root: &Path) -> Self {
        let store = MemStore {
            temp_root: temp_root.to_path_buf(),
            ..Default::default()
        };
        Self(Arc::new(Mutex::new(store)))
    }

    pub fn lock(&self) -> MutexGuard<'_, MemStore> {
        self.0.lock().unwrap()
    }

    pub fn insert(&self, path: &str, archive: MemArchive) -> PathBuf {
        let path = PathBuf::from(path);
        self.lock().archives.insert(path.clone(), archive);
        path
    }

    pub fn archive(&self, path: &Path) -> Option<MemArchive> {
        self.lock().archives.get(path).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn factory(&self) -> impl Fn() -> Box<dyn ArchiveBackend> + use<> {
        let store = self.clone();
        move || Box::new(MemoryBackend::new(store.clone())) as Box<dyn ArchiveBackend>
    }
}

pub struct MemoryBackend {
    store: SharedStore,
    info: BackendInfo,
    path: Option<PathBuf>,
    password: String,
}

impl MemoryBackend {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            info: BackendInfo {
                name: "memory".to_string(),
                description: "In-memory test archives".to_string(),
                kind: BackendKind::Zip,
            },
            path: None,
            password: String::new(),
        }
    }

    fn with_archive<T>(&self, f: impl FnOnce(&mut MemStore, &Path) -> BackendResult<T>) -> BackendResult<T> {
        let path = self.path.clone().ok_or(BackendError::NotOpen)?;
        let mut store = self.store.lock();
        f(&mut store, &path)
    }
}

impl ArchiveBackend for MemoryBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn open(&mut self, path: &Path) -> BackendResult<()> {
        let mut store = self.store.lock();
        store.calls.push(Call::Open(path.to_path_buf()));
        if !store.archives.contains_key(path) {
            return Err(BackendError::NotFound(path.to_path_buf()));
        }
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn archive_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn list_entries(&self, prefix: Option<&str>) -> Vec<String> {
        let password = self.password.clone();
        self.with_archive(|store, path| {
            store.calls.push(Call::List {
                prefix: prefix.map(str::to_string),
                password: password.clone(),
            });
            let archive = store.archives.get(path).ok_or(BackendError::NotOpen)?;
            if !archive.unlocked_by(&password) {
                return Ok(Vec::new());
            }
            Ok(filter_prefix(archive.names(), prefix))
        })
        .unwrap_or_default()
    }

    fn extract_entry_to_temp(&mut self, entry: &str) -> BackendResult<PathBuf> {
        let password = self.password.clone();
        self.with_archive(|store, path| {
            store.calls.push(Call::Extract {
                entry: entry.to_string(),
                password: password.clone(),
            });
            let archive = store.archives.get(path).ok_or(BackendError::NotOpen)?;
            let unlocked = match archive.entry_passwords.get(entry) {
                Some(pw) => *pw == password,
                None => archive.unlocked_by(&password),
            };
            if !unlocked {
                return Err(BackendError::Password(entry.to_string()));
            }
            let found = archive
                .entries
                .iter()
                .find(|(n, _)| n == entry)
                .map(|(_, e)| e.clone())
                .ok_or_else(|| BackendError::EntryNotFound(entry.to_string()))?;

            let rel = enclosed_path(entry).ok_or_else(|| BackendError::UnsafeEntry(entry.to_string()))?;
            let out = unique_temp_dir(&store.temp_root)?.join(rel);
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            match found {
                MemEntry::File(data) => fs::write(&out, data)?,
                MemEntry::Archive(inner) => {
                    fs::write(&out, b"nested")?;
                    store.archives.insert(out.clone(), inner);
                }
                MemEntry::Dir => return Err(BackendError::EntryNotFound(entry.to_string())),
            }
            Ok(out)
        })
    }

    fn extract_all(&mut self, dest: &Path) -> BackendResult<()> {
        let password = self.password.clone();
        self.with_archive(|store, path| {
            store.calls.push(Call::ExtractAll);
            let archive = store.archives.get(path).ok_or(BackendError::NotOpen)?;
            if !archive.unlocked_by(&password) {
                return Err(BackendError::Password(display_name(path)));
            }
            for (name, entry) in &archive.entries {
                let Some(rel) = enclosed_path(name) else {
                    continue;
                };
                let out = dest.join(rel);
                match entry {
                    MemEntry::Dir => fs::create_dir_all(&out)?,
                    MemEntry::File(data) => {
                        if let Some(parent) = out.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::write(&out, data)?;
                    }
                    MemEntry::Archive(_) => {
                        if let Some(parent) = out.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::write(&out, b"nested")?;
                    }
                }
            }
            Ok(())
        })
    }

    fn add_files(&mut self, files: &[PathBuf], dest_in_archive: &str) -> BackendResult<()> {
        self.with_archive(|store, path| {
            let mut added = Vec::new();
            for file in files {
                let data = fs::read(file)?;
                added.push((join_archive_path(dest_in_archive, &display_name(file)), data));
            }
            store.calls.push(Call::Add {
                names: added.iter().map(|(n, _)| n.clone()).collect(),
                dest: dest_in_archive.to_string(),
            });
            if store.fail_add {
                return Err(BackendError::Archive("add refused".to_string()));
            }
            let archive = store.archives.get_mut(path).ok_or(BackendError::NotOpen)?;
            for (name, data) in added {
                archive.entries.retain(|(n, _)| *n != name);
                archive.entries.push((name, MemEntry::File(data)));
            }
            Ok(())
        })
    }

    fn remove_entries(&mut self, entries: &[String]) -> BackendResult<()> {
        self.with_archive(|store, path| {
            store.calls.push(Call::Remove(entries.to_vec()));
            if store.fail_remove {
                return Err(BackendError::Tool {
                    tool: "zip".to_string(),
                    status: 12,
                    stderr: "nothing to do".to_string(),
                });
            }
            let archive = store.archives.get_mut(path).ok_or(BackendError::NotOpen)?;
            for entry in entries {
                if !archive.entries.iter().any(|(n, _)| n == entry) {
                    return Err(BackendError::EntryNotFound(entry.clone()));
                }
            }
            archive.entries.retain(|(n, _)| !entries.contains(n));
            Ok(())
        })
    }

    fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    fn password(&self) -> &str {
        &self.password
    }
}
