use std::path::{Path, PathBuf};

mod cow;
mod tag;

pub use cow::{install, CowCopyDir};
pub use tag::SnapshotTagger;

/// Directory copy related errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The current directory, needed to resolve a relative source, is unknown.
    #[error("cannot resolve the current directory: {0}")]
    CurrentDir(std::io::Error),
    /// The target directory has no final segment to name a clone after.
    #[error("invalid target directory \"{0}\"")]
    InvalidTarget(PathBuf),
    #[error("cannot create zfs snapshot of \"{from}\": {source}")]
    Snapshot { from: PathBuf, source: zfs::Error },
    #[error("cannot create zfs clone of \"{snapshot}\": {source}")]
    Clone { snapshot: String, source: zfs::Error },
    /// The source is not a dataset and this hook does not copy plain directories.
    #[error("\"{0}\" is not a zfs dataset")]
    NotManaged(PathBuf),
    #[error("cannot copy \"{from}\" to \"{to}\": {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// A common result type for our crate.
pub type Result<T> = std::result::Result<T, Error>;

/// `CopyDir` is the contract of a directory copy hook.
///
/// The host calls it for every directory it copies (e.g. when a database is
/// created from a template). Hooks can be stacked, each one holding the hook
/// that was installed before it.
pub trait CopyDir {
    /// Copy `from` to `to`, descending into sub-directories when `recurse` is set.
    fn copydir(&self, from: &Path, to: &Path, recurse: bool) -> Result<()>;
}

impl<F> CopyDir for F
where
    F: Fn(&Path, &Path, bool) -> Result<()>,
{
    fn copydir(&self, from: &Path, to: &Path, recurse: bool) -> Result<()> {
        self(from, to, recurse)
    }
}

/// `RefuseCopy` stands in for the host's plain copy where there is none.
///
/// It fails every request, so only dataset-backed sources can be copied.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefuseCopy;

impl CopyDir for RefuseCopy {
    fn copydir(&self, from: &Path, _to: &Path, _recurse: bool) -> Result<()> {
        Err(Error::NotManaged(from.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closures_are_hooks() {
        let hook: Box<dyn CopyDir> = Box::new(|from: &Path, _: &Path, _: bool| -> Result<()> {
            Err(Error::NotManaged(from.to_path_buf()))
        });
        assert!(matches!(
            hook.copydir(Path::new("a"), Path::new("b"), true),
            Err(Error::NotManaged(_))
        ));
    }

    #[test]
    fn test_refuse_copy() {
        let err = RefuseCopy
            .copydir(Path::new("/srv/plain"), Path::new("/srv/copy"), true)
            .unwrap_err();
        assert_eq!(err.to_string(), "\"/srv/plain\" is not a zfs dataset");
    }
}
