//! Backend that shells out to the Info-ZIP `unzip` and `zip` tools

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{ArchiveBackend, BackendError, BackendInfo, BackendResult, enclosed_path, filter_prefix, non_empty};
use crate::config::{BackendConfig, BackendKind};
use crate::utils::{display_name, join_archive_path, unique_temp_dir};

/// `unzip` exit status when every entry failed on a bad password
const UNZIP_BAD_PASSWORD: i32 = 82;
/// `unzip` exit status when no entry matched
const UNZIP_NO_MATCH: i32 = 11;

/// External tool names and limits
#[derive(Debug, Clone)]
pub struct CliTools {
    pub unzip: String,
    pub zip: String,
    /// Upper bound for each listing-phase invocation
    pub list_timeout: Duration,
}

impl Default for CliTools {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

impl CliTools {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            unzip: config.unzip.clone(),
            zip: config.zip.clone(),
            list_timeout: config.list_timeout(),
        }
    }
}

/// Captured result of a finished tool run
struct ToolOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl ToolOutput {
    fn into_result(self, tool: &str) -> BackendResult<String> {
        if self.status.success() {
            Ok(self.stdout)
        } else {
            Err(BackendError::Tool {
                tool: tool.to_string(),
                status: self.status.code().unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

pub struct CliBackend {
    tools: CliTools,
    temp_root: PathBuf,
    info: BackendInfo,
    path: Option<PathBuf>,
    password: String,
}

impl CliBackend {
    pub fn new(tools: CliTools, temp_root: PathBuf) -> Self {
        Self {
            tools,
            temp_root,
            info: BackendInfo {
                name: "unzip/zip".to_string(),
                description: "Info-ZIP command line tools".to_string(),
                kind: BackendKind::Cli,
            },
            path: None,
            password: String::new(),
        }
    }

    fn archive(&self) -> BackendResult<&Path> {
        self.path.as_deref().ok_or(BackendError::NotOpen)
    }

    /// `-P <password>` when a password is set
    fn password_args(&self) -> Vec<String> {
        match non_empty(&self.password) {
            Some(pw) => vec!["-P".to_string(), pw.to_string()],
            None => Vec::new(),
        }
    }

    /// `-P <password>` for `unzip`, always passed so an encrypted entry
    /// fails instead of `unzip` asking on the terminal
    fn unzip_password_args(&self) -> [String; 2] {
        ["-P".to_string(), self.password.clone()]
    }

    fn unzip(&self) -> Command {
        let mut cmd = Command::new(&self.tools.unzip);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn zip(&self) -> Command {
        let mut cmd = Command::new(&self.tools.zip);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn list_names(&self, archive: &Path) -> BackendResult<Vec<String>> {
        let mut cmd = self.unzip();
        cmd.arg("-Z1").arg(archive);
        let out = run_bounded(cmd, &self.tools.unzip, self.tools.list_timeout)?.into_result(&self.tools.unzip)?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    fn first_encrypted(&self, archive: &Path) -> BackendResult<Option<String>> {
        let mut cmd = self.unzip();
        cmd.arg("-Zs").arg(archive);
        let out = run_bounded(cmd, &self.tools.unzip, self.tools.list_timeout)?.into_result(&self.tools.unzip)?;
        Ok(first_encrypted_entry(&out))
    }

    /// Test-decrypt one entry with the current password
    fn verify_password(&self, archive: &Path, entry: &str) -> BackendResult<bool> {
        let mut cmd = self.unzip();
        cmd.arg("-tqq").args(self.password_args()).arg(archive).arg(entry);
        let out = run_bounded(cmd, &self.tools.unzip, self.tools.list_timeout)?;
        Ok(out.status.success())
    }

    fn try_list(&self, prefix: Option<&str>) -> BackendResult<Vec<String>> {
        let archive = self.archive()?;
        let names = self.list_names(archive)?;
        if let Some(entry) = self.first_encrypted(archive)? {
            if self.password.is_empty() {
                debug!("{}: encrypted and no password set", display_name(archive));
                return Ok(Vec::new());
            }
            if !self.verify_password(archive, &entry)? {
                debug!("{}: password check failed on {}", display_name(archive), entry);
                return Ok(Vec::new());
            }
        }
        Ok(filter_prefix(names, prefix))
    }
}

impl ArchiveBackend for CliBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn open(&mut self, path: &Path) -> BackendResult<()> {
        if !path.is_file() {
            return Err(BackendError::NotFound(path.to_path_buf()));
        }
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
        let archive = self.archive()?.to_path_buf();
        let rel = enclosed_path(entry).ok_or_else(|| BackendError::UnsafeEntry(entry.to_string()))?;
        let dir = unique_temp_dir(&self.temp_root)?;
        debug!("extracting {} from {} into {}", entry, display_name(&archive), dir.display());

        let mut cmd = self.unzip();
        cmd.arg("-o").args(self.unzip_password_args()).arg(&archive).arg(entry).arg("-d").arg(&dir);
        match run(cmd, &self.tools.unzip)?.into_result(&self.tools.unzip) {
            Ok(_) => {}
            Err(BackendError::Tool { status: UNZIP_BAD_PASSWORD, .. }) => {
                return Err(BackendError::Password(entry.to_string()));
            }
            Err(BackendError::Tool { status: UNZIP_NO_MATCH, .. }) => {
                return Err(BackendError::EntryNotFound(entry.to_string()));
            }
            Err(e) => return Err(e),
        }

        let out = dir.join(rel);
        if out.is_file() {
            Ok(out)
        } else {
            Err(BackendError::EntryNotFound(entry.to_string()))
        }
    }

    fn extract_all(&mut self, dest: &Path) -> BackendResult<()> {
        let archive = self.archive()?.to_path_buf();
        fs::create_dir_all(dest)?;
        let mut cmd = self.unzip();
        cmd.arg("-o").args(self.unzip_password_args()).arg(&archive).arg("-d").arg(dest);
        match run(cmd, &self.tools.unzip)?.into_result(&self.tools.unzip) {
            Ok(_) => Ok(()),
            Err(BackendError::Tool { status: UNZIP_BAD_PASSWORD, .. }) => {
                Err(BackendError::Password(display_name(&archive)))
            }
            Err(e) => Err(e),
        }
    }

    fn add_files(&mut self, files: &[PathBuf], dest_in_archive: &str) -> BackendResult<()> {
        let archive = std::path::absolute(self.archive()?)?;

        // zip stores paths relative to its working directory, so lay the
        // files out under a staging dir exactly as they should appear
        let stage = unique_temp_dir(&self.temp_root)?;
        let mut names = Vec::with_capacity(files.len());
        for file in files {
            let name = join_archive_path(dest_in_archive, &display_name(file));
            let staged = stage.join(&name);
            if let Some(parent) = staged.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(file, &staged)?;
            names.push(name);
        }
        debug!("adding {:?} to {}", names, display_name(&archive));

        let mut cmd = self.zip();
        cmd.current_dir(&stage).arg("-q").args(self.password_args()).arg(&archive).args(&names);
        let result = run(cmd, &self.tools.zip).and_then(|o| o.into_result(&self.tools.zip));
        let _ = fs::remove_dir_all(&stage);
        result.map(|_| ())
    }

    fn remove_entries(&mut self, entries: &[String]) -> BackendResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let archive = self.archive()?.to_path_buf();
        debug!("removing {} entries from {}", entries.len(), display_name(&archive));
        let mut cmd = self.zip();
        cmd.arg("-q").arg("-d").arg(&archive).args(entries);
        run(cmd, &self.tools.zip)?.into_result(&self.tools.zip).map(|_| ())
    }

    fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    fn password(&self) -> &str {
        &self.password
    }
}

/// Run to completion with no time limit
fn run(mut cmd: Command, tool: &str) -> BackendResult<ToolOutput> {
    let output = cmd.output().map_err(|e| spawn_error(tool, e))?;
    Ok(ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run with an upper bound on wall time; the child is killed on timeout
fn run_bounded(mut cmd: Command, tool: &str, timeout: Duration) -> BackendResult<ToolOutput> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(tool, e))?;

    // Drain pipes on threads so a chatty child can't block on a full pipe
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BackendError::Timeout(tool.to_string()));
        }
        thread::sleep(Duration::from_millis(10));
    };

    let collect = |h: Option<thread::JoinHandle<String>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok(ToolOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn spawn_error(tool: &str, e: std::io::Error) -> BackendError {
    BackendError::Tool {
        tool: tool.to_string(),
        status: -1,
        stderr: format!("failed to start: {}", e),
    }
}

/// Name of the first encrypted file in `unzip -Zs` output.
///
/// The fifth column is two flag letters; an uppercase first letter (`T`/`B`)
/// marks an encrypted text or binary entry.
fn first_encrypted_entry(zipinfo: &str) -> Option<String> {
    zipinfo.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            return None;
        }
        let flags = fields[4];
        if flags.len() != 2 || !matches!(flags.chars().next(), Some('T' | 'B')) {
            return None;
        }
        let name = rest_after_fields(line, 8)?;
        if name.ends_with('/') { None } else { Some(name.to_string()) }
    })
}

/// Remainder of `line` after skipping `n` whitespace-separated fields,
/// so names containing spaces survive intact
fn rest_after_fields(line: &str, n: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() { None } else { Some(rest) }
}
