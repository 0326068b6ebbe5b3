use crate::{Handler, Result};
use clap::Args;
use copydir::{CopyDir, CowCopyDir, RefuseCopy};
use std::path::PathBuf;
use zfs::ZfsCommand;

/// Arguments for our `CopyCommand`.
///
/// Example :
///
/// `pgcow copy /tank/pgdata/base/1 /tank/pgdata/base/16384`
///
/// The source must be the mountpoint of a dataset. The copy is a clone of a new
/// snapshot of the source, named after the last segment of the target.
#[derive(Debug, Args)]
pub struct CopyCommand {
    /// The directory to copy.
    from: PathBuf,
    /// The directory to create.
    to: PathBuf,
    /// Do not descend into sub-directories.
    #[clap(long)]
    no_recurse: bool,
}

impl Handler for CopyCommand {
    fn handler(&self, zfs: &ZfsCommand) -> Result<()> {
        let cow = CowCopyDir::new(zfs, Box::new(RefuseCopy));
        cow.copydir(&self.from, &self.to, !self.no_recurse)?;
        Ok(())
    }
}
