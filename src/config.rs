//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Archive backend settings
    pub backend: BackendConfig,
    /// Password handling
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Glob patterns (case-insensitive) marking an entry as a nested archive
    pub nested_archive_patterns: Vec<String>,
    /// Reserved entry holding the archive's metadata manifest
    pub manifest_entry: String,
    /// File name used to persist empty folders
    pub placeholder_name: String,
    /// Root for extraction temp dirs (empty = system temp dir)
    pub temp_dir: String,
    /// Log filter used when RUST_LOG is not set
    pub log_level: String,
}

/// Which backend implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External `unzip` / `zip` tools
    #[default]
    Cli,
    /// In-process zip library
    Zip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// unzip executable
    pub unzip: String,
    /// zip executable
    pub zip: String,
    /// Max wait for a listing before giving up (milliseconds)
    pub list_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Try opening with no password before cached/session/prompted ones
    pub try_without_password: bool,
}

fn default_nested_patterns() -> Vec<String> {
    vec!["*.vfsarc".to_string()]
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            nested_archive_patterns: default_nested_patterns(),
            manifest_entry: ".manifest.json".to_string(),
            placeholder_name: ".placeholder".to_string(),
            temp_dir: String::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Cli,
            unzip: "unzip".to_string(),
            zip: "zip".to_string(),
            list_timeout_ms: 3000,
        }
    }
}

impl BackendConfig {
    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }
}

impl GeneralConfig {
    /// Resolved root directory for extraction temp dirs
    pub fn temp_root(&self) -> PathBuf {
        if self.temp_dir.trim().is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(self.temp_dir.trim())
        }
    }
}

/// Get the config directory path for the current platform
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        // Linux: ~/.config/vfsarc
        dirs_next().map(|p| p.join("vfsarc"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config/vfsarc"))
    }

    #[cfg(target_os = "windows")]
    {
        // Windows: %APPDATA%\vfsarc
        std::env::var("APPDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("vfsarc"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config/vfsarc"))
    }
}

#[cfg(target_os = "linux")]
fn dirs_next() -> Option<PathBuf> {
    // Check XDG_CONFIG_HOME first, then fall back to ~/.config
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config")))
}

/// Get the config file path
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

/// Default config file content with comments
fn default_config() -> &'static str {
    r##"# vfsarc configuration

[general]
# Entries matching any of these globs open as nested archives
nested_archive_patterns = ["*.vfsarc"]
# Reserved entry holding the archive manifest
manifest_entry = ".manifest.json"
# Marker file persisted for empty folders
placeholder_name = ".placeholder"
# Root for extraction temp dirs (empty = system temp dir)
temp_dir = ""
# Log filter used when RUST_LOG is not set
log_level = "info"

[backend]
# "cli" (unzip/zip executables) or "zip" (built-in)
kind = "cli"
unzip = "unzip"
zip = "zip"
# Listing gives up after this many milliseconds
list_timeout_ms = 3000

[credentials]
# Try each archive without a password before cached, session and prompted ones
try_without_password = false
"##
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Self {
        let Some(config_path) = config_file() else {
            warn!("Could not determine config directory, using defaults");
            return Config::default();
        };

        // Create config directory if it doesn't exist
        if let Some(config_dir) = config_path.parent()
            && !config_dir.exists()
            && let Err(e) = fs::create_dir_all(config_dir)
        {
            warn!("Could not create config directory: {}", e);
            return Config::default();
        }

        // Create default config if it doesn't exist
        if !config_path.exists()
            && let Err(e) = fs::write(&config_path, default_config())
        {
            warn!("Could not create config file: {}", e);
            return Config::default();
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file, falling back to defaults on error
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Could not parse config file: {}", e);
                    warn!("Using default configuration");
                    Config::default()
                }
            },
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                Config::default()
            }
        }
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(content)
    }
}
