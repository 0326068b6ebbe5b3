use crate::backend::Zfs;
use crate::dataset::Dataset;
use crate::{path, Error, Result, BACKUP_SUFFIX, CRITICAL};
use nix::errno::Errno;
use nix::unistd::{fchownat, FchownatFlags, Gid, Uid};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// The `DirOps` trait is the set of directory operations dataset creation relies on.
pub trait DirOps {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    /// Remove `path` and everything below it. An absent path is not an error.
    fn remove_all(&self, path: &Path) -> io::Result<()>;
    /// Put the content of `backup` back at `mountpoint`, which is now the root of
    /// a freshly mounted dataset.
    fn restore(&self, backup: &Path, mountpoint: &Path) -> io::Result<()> {
        self.rename(backup, mountpoint)
    }
}

/// `HostFs` runs directory operations against the host filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostFs;

impl DirOps for HostFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    /// A mounted dataset root cannot be renamed over, and the backup lives on
    /// the parent dataset. In that case the entries are moved one at a time,
    /// copying them across when they cannot be renamed.
    fn restore(&self, backup: &Path, mountpoint: &Path) -> io::Result<()> {
        restore_with(backup, mountpoint, |from, to| fs::rename(from, to))
    }
}

/// Restore `backup` at `mountpoint`, renaming through `rename`.
///
/// When the whole directory cannot be renamed, the mountpoint takes over the
/// owner, group and mode of the backup, which is then emptied and removed.
fn restore_with<R>(backup: &Path, mountpoint: &Path, rename: R) -> io::Result<()>
where
    R: Fn(&Path, &Path) -> io::Result<()>,
{
    match rename(backup, mountpoint) {
        Err(e) if is_cross_device(&e) => {
            log::debug!(
                "cannot rename '{}' onto mountpoint '{}' ({}), moving entries instead",
                backup.display(),
                mountpoint.display(),
                e
            );
            move_entries(backup, mountpoint, &rename)?;
            copy_attributes(&fs::symlink_metadata(backup)?, mountpoint)?;
            fs::remove_dir(backup)
        }
        result => result,
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error().map(Errno::from_i32),
        Some(Errno::EXDEV) | Some(Errno::EBUSY)
    )
}

fn move_entries<R>(from: &Path, to: &Path, rename: &R) -> io::Result<()>
where
    R: Fn(&Path, &Path) -> io::Result<()>,
{
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());

        match rename(&entry.path(), &target) {
            Err(e) if is_cross_device(&e) => {
                copy_entry(&entry.path(), &target)?;
                HostFs.remove_all(&entry.path())?;
            }
            result => result?,
        }
    }

    Ok(())
}

fn copy_entry(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(from)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        std::os::unix::fs::symlink(fs::read_link(from)?, to)?;
    } else if file_type.is_dir() {
        fs::create_dir(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_entry(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        fs::copy(from, to)?;
    }

    copy_attributes(&metadata, to)
}

/// Give `to` the owner, group and mode described by `metadata`.
///
/// Symbolic links are not followed and keep their own mode. The mode is set
/// after the owner, since a change of owner clears the set-id bits.
fn copy_attributes(metadata: &fs::Metadata, to: &Path) -> io::Result<()> {
    fchownat(
        None,
        to,
        Some(Uid::from_raw(metadata.uid())),
        Some(Gid::from_raw(metadata.gid())),
        FchownatFlags::NoFollowSymlink,
    )?;

    if !metadata.file_type().is_symlink() {
        fs::set_permissions(to, metadata.permissions())?;
    }

    Ok(())
}

/// How far a transplant got, so a failure knows what to undo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransplantState {
    None,
    RenamedAside,
    OriginalRemoved,
    DatasetCreated,
    ContentRestored,
}

/// Moves existing content out of a mountpoint and back into the dataset
/// created over it.
struct Transplant<'a, D: DirOps> {
    fs: &'a D,
    name: &'a str,
    mountpoint: PathBuf,
    backup: PathBuf,
    state: TransplantState,
}

impl<'a, D: DirOps> Transplant<'a, D> {
    fn new(fs: &'a D, name: &'a str, mountpoint: &str) -> Self {
        Transplant {
            fs,
            name,
            mountpoint: PathBuf::from(mountpoint),
            backup: PathBuf::from(format!("{}{}", mountpoint, BACKUP_SUFFIX)),
            state: TransplantState::None,
        }
    }

    fn rename_aside(&mut self) -> Result<()> {
        log::debug!(
            "renaming '{}' to '{}' to create zfs dataset '{}'",
            self.mountpoint.display(),
            self.backup.display(),
            self.name
        );

        self.fs
            .rename(&self.mountpoint, &self.backup)
            .map_err(|source| Error::RenameFailed {
                from: self.mountpoint.clone(),
                to: self.backup.clone(),
                source,
            })?;
        self.state = TransplantState::RenamedAside;
        Ok(())
    }

    fn remove_original(&mut self) -> Result<()> {
        log::debug!(
            "deleting target mountpoint '{}' to create zfs dataset '{}'",
            self.mountpoint.display(),
            self.name
        );

        self.fs
            .remove_all(&self.mountpoint)
            .map_err(|source| Error::DeleteFailed {
                path: self.mountpoint.clone(),
                source,
            })?;
        self.state = TransplantState::OriginalRemoved;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        log::debug!(
            "renaming '{}' to '{}' for creation of zfs dataset '{}'",
            self.backup.display(),
            self.mountpoint.display(),
            self.name
        );

        self.fs
            .restore(&self.backup, &self.mountpoint)
            .map_err(|source| Error::RenameFailed {
                from: self.backup.clone(),
                to: self.mountpoint.clone(),
                source,
            })?;
        self.state = TransplantState::ContentRestored;
        Ok(())
    }

    /// Put the original directory back. Only valid before the dataset exists.
    fn rollback(&mut self) {
        match self.state {
            TransplantState::RenamedAside | TransplantState::OriginalRemoved => {
                log::debug!(
                    "creating zfs dataset '{}' failed, renaming target mountpoint back from '{}' to '{}'",
                    self.name,
                    self.backup.display(),
                    self.mountpoint.display()
                );

                match self.fs.rename(&self.backup, &self.mountpoint) {
                    Ok(()) => self.state = TransplantState::None,
                    Err(e) => log::error!(
                        "cannot rename '{}' back to '{}', error {}",
                        self.backup.display(),
                        self.mountpoint.display(),
                        e
                    ),
                }
            }
            TransplantState::None => {}
            TransplantState::DatasetCreated | TransplantState::ContentRestored => {
                log::error!(
                    "not rolling back zfs dataset '{}', the dataset already exists",
                    self.name
                );
            }
        }
    }
}

impl<'z, Z: Zfs> Dataset<'z, Z> {
    /// Create the child dataset `<parent>/<name>`, mounted at `<parent mountpoint>/<name>`.
    ///
    /// An existing directory at the target mountpoint is supported: its content is
    /// moved aside, the dataset is created, and the content is moved back into it.
    pub fn create(parent: &Dataset<'z, Z>, name: &str) -> Result<Dataset<'z, Z>> {
        Self::create_with(parent, name, &HostFs)
    }

    /// Same as `create`, running the directory operations through `fs`.
    ///
    /// The sequence is a set of compensating steps, not a transaction. Someone
    /// else writing to the target mountpoint while it runs is not detected.
    pub fn create_with<D: DirOps>(
        parent: &Dataset<'z, Z>,
        name: &str,
        fs: &D,
    ) -> Result<Dataset<'z, Z>> {
        let zfs = parent.zfs();
        let dataset_name = format!("{}/{}", parent.name(), name);
        let parent_mountpoint = parent.mountpoint().ok_or_else(|| {
            log::error!(
                "cannot create zfs dataset '{}', parent has no mountpoint",
                dataset_name
            );
            Error::NoParentMountpoint(dataset_name.clone(), parent.name().to_string())
        })?;
        let dataset_mountpoint = path::join(&parent_mountpoint, name);
        let target = Path::new(&dataset_mountpoint);

        if !fs.exists(target) {
            return create_direct(zfs, &dataset_name, &dataset_mountpoint);
        }

        if !fs.is_dir(target) {
            log::error!(
                "cannot create zfs dataset '{}', mountpoint '{}' is not a directory",
                dataset_name,
                dataset_mountpoint
            );
            return Err(Error::NotADirectory {
                name: dataset_name,
                mountpoint: dataset_mountpoint,
            });
        }

        create_over_existing(zfs, fs, &dataset_name, &dataset_mountpoint)
    }
}

fn create_direct<'z, Z: Zfs>(
    zfs: &'z Z,
    name: &str,
    mountpoint: &str,
) -> Result<Dataset<'z, Z>> {
    log::debug!("creating zfs dataset '{}' in '{}'", name, mountpoint);

    if let Err(source) = zfs.create(name) {
        log::error!(
            "failed to create zfs dataset '{}' in '{}', error {}",
            name,
            mountpoint,
            source
        );
        return Err(Error::CreateFailed {
            name: name.to_string(),
            mountpoint: mountpoint.to_string(),
            source,
        });
    }

    Dataset::open(zfs, name).map_err(|source| {
        log::error!(
            "created zfs dataset '{}', but cannot open it, error {}",
            name,
            source
        );
        Error::OpenFailed {
            name: name.to_string(),
            source,
        }
    })
}

fn create_over_existing<'z, Z: Zfs, D: DirOps>(
    zfs: &'z Z,
    fs: &D,
    name: &str,
    mountpoint: &str,
) -> Result<Dataset<'z, Z>> {
    let mut transplant = Transplant::new(fs, name, mountpoint);

    transplant.rename_aside().map_err(|e| {
        log::error!("cannot create zfs dataset '{}', {}", name, e);
        e
    })?;

    if let Err(e) = transplant.remove_original() {
        log::error!("cannot create zfs dataset '{}', {}", name, e);
        transplant.rollback();
        return Err(e);
    }

    log::debug!("creating zfs dataset '{}' in '{}'", name, mountpoint);

    if let Err(source) = zfs.create(name) {
        log::error!("failed to create zfs dataset '{}', error {}", name, source);
        transplant.rollback();
        return Err(Error::CreateFailed {
            name: name.to_string(),
            mountpoint: mountpoint.to_string(),
            source,
        });
    }
    transplant.state = TransplantState::DatasetCreated;

    // Without a handle the dataset can neither be checked nor destroyed, so the
    // backup has to stay where it is.
    let dataset = match Dataset::open(zfs, name) {
        Ok(dataset) => dataset,
        Err(e) => {
            log::error!(
                target: CRITICAL,
                "created zfs dataset '{}', but cannot open, filesystem is now in a inconsistent state, content of '{}' is in '{}', error {}",
                name,
                mountpoint,
                transplant.backup.display(),
                e
            );
            return Err(Error::Inconsistent {
                name: name.to_string(),
                reason: format!(
                    "dataset was created but cannot be opened ({}), original content is in '{}'",
                    e,
                    transplant.backup.display()
                ),
            });
        }
    };

    let actual = dataset.mountpoint();
    if actual.as_deref() != Some(mountpoint) {
        log::error!(
            "created zfs dataset '{}', but got mounted in '{}' instead of '{}'",
            name,
            actual.as_deref().unwrap_or("<none>"),
            mountpoint
        );

        if let Err(e) = dataset.destroy(false) {
            log::error!("cannot undo creation of zfs dataset '{}', {}", name, e);
        }
        transplant.state = TransplantState::OriginalRemoved;
        transplant.rollback();

        return Err(Error::MountpointMismatch {
            name: name.to_string(),
            expected: mountpoint.to_string(),
            actual,
        });
    }

    if let Err(e) = transplant.restore() {
        log::error!(
            target: CRITICAL,
            "created zfs dataset '{}', but cannot restore mountpoint '{}' from '{}', filesystem is now in a inconsistent state, {}",
            name,
            mountpoint,
            transplant.backup.display(),
            e
        );
        return Err(Error::Inconsistent {
            name: name.to_string(),
            reason: format!(
                "original content is stuck in '{}' ({})",
                transplant.backup.display(),
                e
            ),
        });
    }

    Ok(dataset)
}
