use crate::backend::{Zfs, ZfsError};
use crate::registry::Registry;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;

/// What a dataset is, assigned when the handle is produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatasetKind {
    /// A plain, writable filesystem dataset.
    Filesystem,
    /// A read-only, point-in-time view of `origin`.
    Snapshot { origin: String, tag: String },
    /// A writable dataset whose content came from the snapshot `origin`.
    Clone { origin: String },
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Filesystem => "filesystem",
            DatasetKind::Snapshot { .. } => "snapshot",
            DatasetKind::Clone { .. } => "clone",
        }
    }
}

/// `Dataset` owns one open management-layer handle.
///
/// The handle is released when the `Dataset` is dropped, whatever path the
/// owner leaves through. Datasets are independent of each other and can be
/// dropped in any order.
pub struct Dataset<'z, Z: Zfs> {
    zfs: &'z Z,
    handle: Z::Handle,
    /// Full name, cached at open time.
    name: String,
    /// Set when this handle produced the dataset itself.
    kind: Option<DatasetKind>,
}

impl<'z, Z: Zfs> Dataset<'z, Z> {
    pub(crate) fn from_handle(zfs: &'z Z, handle: Z::Handle) -> Self {
        let name = zfs.name(&handle);
        Dataset {
            zfs,
            handle,
            name,
            kind: None,
        }
    }

    pub(crate) fn open(zfs: &'z Z, name: &str) -> std::result::Result<Self, ZfsError> {
        zfs.open(name).map(|handle| Self::from_handle(zfs, handle))
    }

    /// Open a dataset by its full name, e.g. `tank/pgdata/base`.
    pub fn by_name(zfs: &'z Z, name: &str) -> Result<Self> {
        Self::open(zfs, name).map_err(|e| {
            log::debug!("cannot open zfs dataset '{}', error {}", name, e);
            Error::NotFound(name.to_string())
        })
    }

    /// Open the dataset currently mounted at `mountpoint`.
    ///
    /// The mountpoint is compared as a string, so it must already be absolute
    /// and canonical.
    pub fn by_mountpoint(zfs: &'z Z, mountpoint: &str) -> Result<Self> {
        Registry::new(zfs).by_mountpoint(mountpoint)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the absolute path to where this dataset is mounted.
    ///
    /// The value is read from the management layer on every call. `None` means
    /// unmounted or unknown; a failed lookup is logged.
    pub fn mountpoint(&self) -> Option<String> {
        match self.zfs.mountpoint(&self.handle) {
            Ok(mountpoint) => mountpoint,
            Err(e) => {
                log::error!(
                    "failed to get zfs dataset '{}' mountpoint, error {}",
                    self.name,
                    e
                );
                None
            }
        }
    }

    /// Get the kind of this dataset, asking the management layer if this handle
    /// did not create it.
    pub fn kind(&self) -> Option<DatasetKind> {
        if let Some(kind) = &self.kind {
            return Some(kind.clone());
        }

        match self.zfs.kind(&self.handle) {
            Ok(kind) => Some(kind),
            Err(e) => {
                log::error!("failed to get zfs dataset '{}' type, error {}", self.name, e);
                None
            }
        }
    }

    pub(crate) fn handle(&self) -> &Z::Handle {
        &self.handle
    }

    pub(crate) fn zfs(&self) -> &'z Z {
        self.zfs
    }

    /// Destroy the dataset.
    ///
    /// With `delete_mountpoint`, whatever is left at the last known mountpoint is
    /// removed too, on a best-effort basis. Nothing is removed when the destroy
    /// itself fails.
    pub fn destroy(self, delete_mountpoint: bool) -> Result<()> {
        let mountpoint = if delete_mountpoint {
            self.mountpoint()
        } else {
            None
        };

        log::debug!("destroying zfs dataset '{}'", self.name);

        self.zfs
            .destroy(&self.handle)
            .map_err(|source| Error::DestroyFailed {
                name: self.name.clone(),
                source,
            })?;

        if let Some(mountpoint) = mountpoint {
            if let Err(e) = std::fs::remove_dir_all(&mountpoint) {
                log::debug!("ignoring failure to delete '{}': {}", mountpoint, e);
            }
        }

        Ok(())
    }

    /// Create a snapshot of this dataset and its descendants named `<name>@<tag>`.
    pub fn snapshot(&self, tag: &str) -> Result<Dataset<'z, Z>> {
        let snapshot_name = format!("{}@{}", self.name, tag);

        log::debug!(
            "snapshotting zfs dataset '{}' to '{}'",
            self.name,
            snapshot_name
        );

        if let Err(source) = self.zfs.snapshot(&snapshot_name, true) {
            log::error!(
                "failed to snapshot zfs dataset '{}', error {}",
                snapshot_name,
                source
            );
            return Err(Error::SnapshotFailed {
                name: snapshot_name,
                source,
            });
        }

        let mut snapshot = Dataset::open(self.zfs, &snapshot_name).map_err(|source| {
            log::error!(
                "snapshotted zfs dataset '{}', but can't open, error {}",
                snapshot_name,
                source
            );
            Error::SnapshotFailed {
                name: snapshot_name.clone(),
                source,
            }
        })?;

        snapshot.kind = Some(DatasetKind::Snapshot {
            origin: self.name.clone(),
            tag: tag.to_string(),
        });

        Ok(snapshot)
    }

    /// Clone this snapshot into a sibling of its dataset named `leaf`.
    ///
    /// `tank/base/1@1700000000000` cloned as `2` gives `tank/base/2`.
    pub fn clone_as(&self, leaf: &str) -> Result<Dataset<'z, Z>> {
        let clone_name = clone_name(&self.name, leaf)?;

        log::debug!("cloning zfs dataset '{}' to '{}'", self.name, clone_name);

        if let Err(source) = self.zfs.clone_snapshot(&self.handle, &clone_name) {
            log::error!(
                "failed to clone zfs dataset '{}' into '{}', error {}",
                self.name,
                clone_name,
                source
            );
            return Err(Error::CloneFailed {
                snapshot: self.name.clone(),
                clone: clone_name,
                source,
            });
        }

        let mut clone = Dataset::open(self.zfs, &clone_name).map_err(|source| {
            log::error!(
                "cloned zfs dataset '{}', but can't open, error {}",
                clone_name,
                source
            );
            Error::CloneFailed {
                snapshot: self.name.clone(),
                clone: clone_name.clone(),
                source,
            }
        })?;

        clone.kind = Some(DatasetKind::Clone {
            origin: self.name.clone(),
        });

        Ok(clone)
    }
}

impl<'z, Z: Zfs> Drop for Dataset<'z, Z> {
    fn drop(&mut self) {
        self.zfs.close(&self.handle);
    }
}

impl<'z, Z: Zfs> fmt::Debug for Dataset<'z, Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Build the name of a clone of `snapshot`.
///
/// The snapshot tag is dropped, then the last `/` segment is replaced by `leaf`.
/// Without any `/` the clone is simply named `leaf`. A snapshot whose dataset part
/// is empty or starts with `/` is rejected rather than truncated.
pub(crate) fn clone_name(snapshot: &str, leaf: &str) -> Result<String> {
    let invalid = |reason| Error::InvalidCloneName {
        snapshot: snapshot.to_string(),
        leaf: leaf.to_string(),
        reason,
    };

    if leaf.is_empty() || leaf.contains(|c| c == '/' || c == '@') {
        return Err(invalid("leaf must be a single non-empty name segment"));
    }

    let dataset = match snapshot.find('@') {
        Some(index) => &snapshot[..index],
        None => snapshot,
    };
    if dataset.is_empty() {
        return Err(invalid("no dataset name before '@'"));
    }

    match dataset.rfind('/') {
        Some(0) => Err(invalid("dataset name starts with '/'")),
        Some(index) => Ok(format!("{}{}", &dataset[..=index], leaf)),
        None => Ok(leaf.to_string()),
    }
}
