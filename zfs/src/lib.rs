use std::path::PathBuf;

mod backend;
mod command;
mod create;
mod dataset;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod path;
mod registry;

pub use backend::{Zfs, ZfsError};
pub use command::{CommandHandle, ZfsCommand, DEFAULT_ZFS_BIN, DEFAULT_ZPOOL_BIN};
pub use create::{DirOps, HostFs};
pub use dataset::{Dataset, DatasetKind};
pub use registry::Registry;

/// Log target for conditions that leave the filesystem in a state an operator
/// has to repair by hand.
pub const CRITICAL: &str = "pgcow::critical";

/// Suffix appended to a mountpoint while its content is moved out of the way.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Dataset management errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No dataset matched a name or a mountpoint.
    #[error("cannot find zfs dataset '{0}'")]
    NotFound(String),
    /// The parent of a dataset to create is not mounted anywhere.
    #[error("cannot create zfs dataset '{0}', parent dataset '{1}' has no mountpoint")]
    NoParentMountpoint(String, String),
    /// The target mountpoint exists but is not a directory.
    #[error("cannot create zfs dataset '{name}', mountpoint '{mountpoint}' is not a directory")]
    NotADirectory { name: String, mountpoint: String },
    #[error("failed to create zfs dataset '{name}' in '{mountpoint}', error {source}")]
    CreateFailed {
        name: String,
        mountpoint: String,
        source: ZfsError,
    },
    #[error("created zfs dataset '{name}', but cannot open it, error {source}")]
    OpenFailed { name: String, source: ZfsError },
    #[error("cannot rename '{from}' to '{to}', error {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot delete '{path}', error {source}")]
    DeleteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The dataset got mounted somewhere other than where it was asked to.
    #[error("created zfs dataset '{name}', but got mounted in '{}' instead of '{expected}'", .actual.as_deref().unwrap_or("<none>"))]
    MountpointMismatch {
        name: String,
        expected: String,
        actual: Option<String>,
    },
    /// The filesystem no longer matches any clean state and needs manual repair.
    #[error("zfs dataset '{name}' left the filesystem in an inconsistent state: {reason}")]
    Inconsistent { name: String, reason: String },
    #[error("failed to destroy zfs dataset '{name}', error {source}")]
    DestroyFailed { name: String, source: ZfsError },
    #[error("failed to snapshot zfs dataset '{name}', error {source}")]
    SnapshotFailed { name: String, source: ZfsError },
    #[error("failed to clone zfs dataset '{snapshot}' into '{clone}', error {source}")]
    CloneFailed {
        snapshot: String,
        clone: String,
        source: ZfsError,
    },
    /// A clone name cannot be derived from the snapshot and leaf names.
    #[error("cannot derive a clone name from '{snapshot}' and '{leaf}': {reason}")]
    InvalidCloneName {
        snapshot: String,
        leaf: String,
        reason: &'static str,
    },
}

impl Error {
    /// Whether the error requires manual inspection of the filesystem.
    pub fn is_critical(&self) -> bool {
        matches!(self, Error::Inconsistent { .. })
    }
}

/// A common result type for our crate.
pub type Result<T> = std::result::Result<T, Error>;
