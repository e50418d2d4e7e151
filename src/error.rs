//! Error kinds for every layer of the tool manager.
//!
//! Registry and sync errors are recoverable and reported per item. Store and
//! transfer errors are fatal for the command that raised them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by [`Registry`](crate::registry::Registry) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already tracked")]
    DuplicateName(String),

    #[error("path {} is already claimed by tool '{owner}'", path.display())]
    DuplicatePath { path: PathBuf, owner: String },

    #[error("no tool named '{0}'")]
    NotFound(String),

    #[error("invalid tool: {0}")]
    InvalidTool(String),

    #[error("tool '{tool}' has no tag '{tag}'")]
    TagMissing { tool: String, tag: String },

    #[error("tool '{tool}' already has tag '{tag}'")]
    TagExists { tool: String, tag: String },
}

/// Per-tool failures of the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("path {} does not exist", .0.display())]
    PathMissing(PathBuf),

    #[error("{} is not a git working copy", .0.display())]
    NotARepository(PathBuf),

    #[error("clone failed: {0}")]
    CloneError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("cannot fast-forward: {0}")]
    MergeConflict(String),

    #[error("no upstream branch configured: {0}")]
    NoUpstream(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl SyncError {
    /// Short, stable identifier used in report lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::PathMissing(_) => "PathMissing",
            SyncError::NotARepository(_) => "NotARepository",
            SyncError::CloneError(_) => "CloneError",
            SyncError::NetworkError(_) => "NetworkError",
            SyncError::MergeConflict(_) => "MergeConflict",
            SyncError::NoUpstream(_) => "NoUpstream",
            SyncError::Io(_) => "Io",
        }
    }
}

/// Failures of the on-disk configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration store {} is corrupt: {reason}", path.display())]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("configuration store {} does not exist", .0.display())]
    StoreMissing(PathBuf),

    #[error("could not write configuration store {}", path.display())]
    StoreWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not lock configuration store {}", path.display())]
    StoreLocked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of bundle export and import.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("bundle {} is corrupt: {reason}", path.display())]
    BundleCorrupt { path: PathBuf, reason: String },

    #[error("bundle {} already exists", .0.display())]
    BundleExists(PathBuf),

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rejected cron expressions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 cron fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} value '{value}', expected '*' or a comma-separated list within {min}-{max}")]
    InvalidField {
        field: &'static str,
        value: String,
        min: u8,
        max: u8,
    },

    #[error("no schedule frequency is set")]
    NoFrequency,
}
