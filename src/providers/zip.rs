//! In-process backend on the `zip` crate

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use ::zip::result::ZipError;
use ::zip::unstable::write::FileOptionsExt;
use ::zip::write::SimpleFileOptions;
use ::zip::{ZipArchive, ZipWriter};
use tracing::debug;

use super::{ArchiveBackend, BackendError, BackendInfo, BackendResult, filter_prefix, non_empty};
use crate::config::BackendKind;
use crate::utils::{display_name, join_archive_path, unique_temp_dir};

pub struct ZipBackend {
    temp_root: PathBuf,
    info: BackendInfo,
    path: Option<PathBuf>,
    password: String,
}

impl ZipBackend {
    pub fn new(temp_root: PathBuf) -> Self {
        Self {
            temp_root,
            info: BackendInfo {
                name: "zip-rs".to_string(),
                description: "Built-in ZIP support".to_string(),
                kind: BackendKind::Zip,
            },
            path: None,
            password: String::new(),
        }
    }

    fn reader(&self) -> BackendResult<ZipArchive<File>> {
        let path = self.path.as_deref().ok_or(BackendError::NotOpen)?;
        Ok(ZipArchive::new(File::open(path)?)?)
    }

    fn try_list(&self, prefix: Option<&str>) -> BackendResult<Vec<String>> {
        let mut archive = self.reader()?;
        let mut names = Vec::with_capacity(archive.len());
        let mut encrypted = None;
        for i in 0..archive.len() {
            let file = archive.by_index_raw(i)?;
            if encrypted.is_none() && file.encrypted() && !file.is_dir() {
                encrypted = Some(i);
            }
            names.push(file.name().to_string());
        }

        // One full decrypting read settles the password for the archive
        if let Some(index) = encrypted {
            let Some(pw) = non_empty(&self.password) else {
                return Ok(Vec::new());
            };
            let mut file = archive.by_index_decrypt(index, pw.as_bytes())?;
            io::copy(&mut file, &mut io::sink())?;
        }
        Ok(filter_prefix(names, prefix))
    }

    /// Rewrite the archive without `skip`, via a sibling file renamed over
    /// the archive.
    ///
    /// Plain entries are copied raw. Encrypted ones are decrypted with the
    /// current password and encrypted again, since raw-copied ZipCrypto data
    /// does not survive the rewrite.
    fn rebuild_without(&self, skip: &HashSet<&str>) -> BackendResult<usize> {
        let path = self.path.as_deref().ok_or(BackendError::NotOpen)?;
        let mut archive = self.reader()?;
        let rewrite = path.with_file_name(format!(".{}.rewrite", display_name(path)));

        let mut writer = ZipWriter::new(File::create(&rewrite)?);
        let mut dropped = 0;
        let copied = (|| -> BackendResult<()> {
            for i in 0..archive.len() {
                let (name, reencrypt) = {
                    let file = archive.by_index_raw(i)?;
                    (file.name().to_string(), file.encrypted() && !file.is_dir())
                };
                if skip.contains(name.as_str()) {
                    dropped += 1;
                    continue;
                }
                if !reencrypt {
                    writer.raw_copy_file(archive.by_index_raw(i)?)?;
                    continue;
                }

                let pw = non_empty(&self.password).ok_or_else(|| BackendError::Password(name.clone()))?;
                let mut file = archive
                    .by_index_decrypt(i, pw.as_bytes())
                    .map_err(|e| password_error(e, &name))?;
                let mut options = SimpleFileOptions::default()
                    .compression_method(file.compression())
                    .with_deprecated_encryption(pw.as_bytes());
                if let Some(modified) = file.last_modified() {
                    options = options.last_modified_time(modified);
                }
                let mut data = Vec::new();
                file.read_to_end(&mut data).map_err(|e| read_error(e, &name))?;
                writer.start_file(name.as_str(), options)?;
                writer.write_all(&data)?;
            }
            writer.finish()?;
            Ok(())
        })();

        if let Err(e) = copied {
            let _ = fs::remove_file(&rewrite);
            return Err(e);
        }
        fs::rename(&rewrite, path)?;
        Ok(dropped)
    }
}

/// Decryption failures surface as corrupt data on read
fn read_error(e: io::Error, entry: &str) -> BackendError {
    match e.kind() {
        io::ErrorKind::InvalidData => BackendError::Password(entry.to_string()),
        _ => BackendError::Io(e),
    }
}

/// Missing or wrong password, however the crate chose to report it
fn password_error(e: ZipError, entry: &str) -> BackendError {
    match e {
        ZipError::InvalidPassword => BackendError::Password(entry.to_string()),
        ZipError::UnsupportedArchive(msg) if msg.to_lowercase().contains("password") => {
            BackendError::Password(entry.to_string())
        }
        ZipError::FileNotFound => BackendError::EntryNotFound(entry.to_string()),
        other => other.into(),
    }
}

impl ArchiveBackend for ZipBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn open(&mut self, path: &Path) -> BackendResult<()> {
        if !path.is_file() {
            return Err(BackendError::NotFound(path.to_path_buf()));
        }
        ZipArchive::new(File::open(path)?)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn archive_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn list_entries(&self, prefix: Option<&str>) -> Vec<String> {
        match self.try_list(prefix) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("listing failed: {}", e);
                Vec::new()
            }
        }
    }

    fn extract_entry_to_temp(&mut self, entry: &str) -> BackendResult<PathBuf> {
        let mut archive = self.reader()?;
        let mut file = match non_empty(&self.password) {
            Some(pw) => archive.by_name_decrypt(entry, pw.as_bytes()),
            None => archive.by_name(entry),
        }
        .map_err(|e| password_error(e, entry))?;
        if file.is_dir() {
            return Err(BackendError::EntryNotFound(entry.to_string()));
        }

        let rel = file
            .enclosed_name()
            .ok_or_else(|| BackendError::UnsafeEntry(entry.to_string()))?;
        let out = unique_temp_dir(&self.temp_root)?.join(rel);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| read_error(e, entry))?;
        fs::write(&out, data)?;
        Ok(out)
    }

    fn extract_all(&mut self, dest: &Path) -> BackendResult<()> {
        let mut archive = self.reader()?;
        fs::create_dir_all(dest)?;
        for i in 0..archive.len() {
            let mut file = match non_empty(&self.password) {
                Some(pw) => archive.by_index_decrypt(i, pw.as_bytes()),
                None => archive.by_index(i),
            }
            .map_err(|e| password_error(e, &format!("#{}", i)))?;
            let Some(rel) = file.enclosed_name() else {
                debug!("skipping unsafe entry name {}", file.name());
                continue;
            };
            let out = dest.join(rel);
            if file.is_dir() {
                fs::create_dir_all(&out)?;
                continue;
            }
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            io::copy(&mut file, &mut File::create(&out)?)?;
        }
        Ok(())
    }

    fn add_files(&mut self, files: &[PathBuf], dest_in_archive: &str) -> BackendResult<()> {
        let path = self.path.clone().ok_or(BackendError::NotOpen)?;
        let names: Vec<String> = files
            .iter()
            .map(|f| join_archive_path(dest_in_archive, &display_name(f)))
            .collect();

        // Same-named entries are replaced, as the zip tool would
        let existing: HashSet<String> = self.reader()?.file_names().map(str::to_string).collect();
        let replaced: HashSet<&str> = names
            .iter()
            .filter(|n| existing.contains(n.as_str()))
            .map(String::as_str)
            .collect();
        if !replaced.is_empty() {
            self.rebuild_without(&replaced)?;
        }

        debug!("appending {:?} to {}", names, display_name(&path));
        let handle = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut writer = ZipWriter::new_append(handle)?;
        for (file, name) in files.iter().zip(&names) {
            writer.start_file(name.as_str(), SimpleFileOptions::default())?;
            io::copy(&mut File::open(file)?, &mut writer)?;
        }
        writer.finish()?;
        Ok(())
    }

    fn remove_entries(&mut self, entries: &[String]) -> BackendResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let skip: HashSet<&str> = entries.iter().map(String::as_str).collect();
        if self.rebuild_without(&skip)? == 0 {
            return Err(BackendError::EntryNotFound(entries.join(", ")));
        }
        Ok(())
    }

    fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    fn password(&self) -> &str {
        &self.password
    }
}
