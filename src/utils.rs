use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Prefix for per-extraction temporary directories
const TEMP_DIR_PREFIX: &str = "vfsarc_tmp_";

/// Convert a glob pattern (with * and ?) to a regex pattern
pub fn glob_to_regex(pattern: &str, case_sensitive: bool) -> String {
    let mut regex = if case_sensitive {
        String::from("^") // Case-sensitive, anchor at start
    } else {
        String::from("(?i)^") // Case-insensitive, anchor at start
    };
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            // Escape regex special characters
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }
    regex.push('$'); // Anchor at end
    regex
}

/// Create a fresh, uniquely named directory under `root`.
///
/// Repeated extractions of same-named entries never collide. Nothing removes
/// these directories; they live as long as the host keeps its temp space.
pub fn unique_temp_dir(root: &Path) -> io::Result<PathBuf> {
    let dir = root.join(format!("{}{}", TEMP_DIR_PREFIX, uuid::Uuid::new_v4().simple()));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// File name of a path for display, falling back to the whole path
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Last `/`-separated segment of an archive path
pub fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Join an archive folder path and a name
pub fn join_archive_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}
