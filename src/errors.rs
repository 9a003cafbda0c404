use std::path::PathBuf;

use thiserror::Error;
use crate::providers::BackendError;
use crate::tree::TreeError;

/// Application-level errors surfaced by the navigator.
///
/// User cancellation is not an error: navigator operations report it as
/// `Outcome::Cancelled` so the caller can drop the action silently.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not open archive {}: {reason}", path.display())]
    ArchiveOpen { path: PathBuf, reason: String },

    #[error("Password did not work for {archive}")]
    PasswordRejected { archive: String },

    #[error("{op} failed: {source} (the archive tool may have rebuilt or partially updated the archive)")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("No archive is open")]
    NoArchive,

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn backend(op: &'static str, source: BackendError) -> Self {
        AppError::Backend { op, source }
    }
}

pub type AppResult<T> = Result<T, AppError>;
