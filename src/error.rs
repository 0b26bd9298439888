//! Error taxonomy for the mount engine.
//!
//! Library seams return these typed errors; the CLI layer wraps them in
//! `anyhow` with context.

use std::path::PathBuf;

use thiserror::Error;

use crate::mount::MountError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A module directory could not be read. Never fatal to a scan.
#[derive(Debug, Error)]
#[error("cannot read module {module} at {path}: {source}")]
pub struct ScanError {
    pub module: String,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Errors from the JSON state files kept in the state directory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by a planning or activation run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another activation holds the engine lock.
    #[error("another activation is running (lock held on {0})")]
    LockContention(PathBuf),

    /// A mount step failed; the activation's own operations were unwound.
    #[error("mount failure on partition {partition}: {source}")]
    MountFailure {
        partition: String,
        #[source]
        source: MountError,
    },

    /// Unwinding after a failure did not fully succeed.
    #[error("unwind incomplete after failure on {partition}: {failed} operation(s) could not be reverted")]
    UnwindIncomplete { partition: String, failed: usize },

    /// Teardown left some owned mounts in place; they stay in the inventory.
    #[error("teardown incomplete: {remaining} mount(s) could not be removed")]
    TeardownIncomplete { remaining: usize },

    /// Temp storage for overlay layers is missing or unusable.
    #[error("temp storage unavailable at {path}: {source}")]
    TempStorage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Module root could not be listed at all.
    #[error("cannot list module directory {path}: {source}")]
    ModuleDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A winnowing path did not decompose into (partition, relative_path).
    #[error("invalid winnowing path '{0}': expected /<partition>/<relative path>")]
    InvalidRulePath(String),

    /// A partition name outside the configured allow-list.
    #[error("unknown partition '{0}'")]
    UnknownPartition(String),

    /// Relocate source is not a mount this engine owns.
    #[error("no inventory entry mounted at {0}")]
    NotOwned(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
