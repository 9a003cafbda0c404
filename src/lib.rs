//! vfsarc - browse archives as a lazily disclosed virtual file system
//!
//! The core is three pieces: the [`tree::EntryTree`] of archive entries, the
//! credential resolver in [`state::credentials`] and the
//! [`state::Navigator`] that drives both against an
//! [`providers::ArchiveBackend`].

pub mod config;
pub mod errors;
pub mod manifest;
pub mod providers;
pub mod shell;
pub mod state;
pub mod tree;
pub mod utils;

pub use errors::{AppError, AppResult};
pub use state::{Navigator, Outcome};
