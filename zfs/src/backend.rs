use crate::DatasetKind;
use std::fmt;

/// An error reported by the management layer.
///
/// Formats as `<code> - <action>: <description>`, the shape operators know
/// from the native tooling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZfsError {
    pub code: i32,
    pub action: String,
    pub description: String,
}

impl ZfsError {
    pub fn new(code: i32, action: impl Into<String>, description: impl Into<String>) -> Self {
        ZfsError {
            code,
            action: action.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ZfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}: {}", self.code, self.action, self.description)
    }
}

impl std::error::Error for ZfsError {}

/// The `Zfs` trait is the handle based management API the datasets are driven through.
///
/// A `Handle` is the native resource behind one open dataset, snapshot or clone.
/// Every handle returned by `open`, `iter_root` or `iter_children` must be passed
/// to `close` exactly once; `Dataset` takes care of that.
pub trait Zfs {
    type Handle;

    /// Open an existing dataset or snapshot by its full name.
    fn open(&self, name: &str) -> Result<Self::Handle, ZfsError>;
    /// Release a handle.
    fn close(&self, handle: &Self::Handle);
    /// Full name of the dataset behind a handle.
    fn name(&self, handle: &Self::Handle) -> String;
    /// Live mountpoint property, `None` when the dataset is not mounted anywhere.
    fn mountpoint(&self, handle: &Self::Handle) -> Result<Option<String>, ZfsError>;
    /// Kind of the dataset, read from its `type` and `origin` properties.
    fn kind(&self, handle: &Self::Handle) -> Result<DatasetKind, ZfsError>;
    /// Create a filesystem dataset, mounted below its parent's mountpoint.
    fn create(&self, name: &str) -> Result<(), ZfsError>;
    /// Destroy a dataset without its descendants.
    fn destroy(&self, handle: &Self::Handle) -> Result<(), ZfsError>;
    /// Create the snapshot `name` (`<dataset>@<tag>`).
    fn snapshot(&self, name: &str, recursive: bool) -> Result<(), ZfsError>;
    /// Create the writable dataset `target` from a snapshot.
    fn clone_snapshot(&self, snapshot: &Self::Handle, target: &str) -> Result<(), ZfsError>;
    /// Open every root dataset.
    fn iter_root(&self) -> Result<Vec<Self::Handle>, ZfsError>;
    /// Open the direct children (datasets and snapshots) of a dataset.
    fn iter_children(&self, handle: &Self::Handle) -> Result<Vec<Self::Handle>, ZfsError>;
}

impl<Z: Zfs + ?Sized> Zfs for &Z {
    type Handle = Z::Handle;

    fn open(&self, name: &str) -> Result<Self::Handle, ZfsError> {
        (**self).open(name)
    }

    fn close(&self, handle: &Self::Handle) {
        (**self).close(handle)
    }

    fn name(&self, handle: &Self::Handle) -> String {
        (**self).name(handle)
    }

    fn mountpoint(&self, handle: &Self::Handle) -> Result<Option<String>, ZfsError> {
        (**self).mountpoint(handle)
    }

    fn kind(&self, handle: &Self::Handle) -> Result<DatasetKind, ZfsError> {
        (**self).kind(handle)
    }

    fn create(&self, name: &str) -> Result<(), ZfsError> {
        (**self).create(name)
    }

    fn destroy(&self, handle: &Self::Handle) -> Result<(), ZfsError> {
        (**self).destroy(handle)
    }

    fn snapshot(&self, name: &str, recursive: bool) -> Result<(), ZfsError> {
        (**self).snapshot(name, recursive)
    }

    fn clone_snapshot(&self, snapshot: &Self::Handle, target: &str) -> Result<(), ZfsError> {
        (**self).clone_snapshot(snapshot, target)
    }

    fn iter_root(&self) -> Result<Vec<Self::Handle>, ZfsError> {
        (**self).iter_root()
    }

    fn iter_children(&self, handle: &Self::Handle) -> Result<Vec<Self::Handle>, ZfsError> {
        (**self).iter_children(handle)
    }
}
