use clap::Args;
use std::path::PathBuf;
use zfs::{ZfsCommand, DEFAULT_ZFS_BIN, DEFAULT_ZPOOL_BIN};

/// Options telling how to reach the zfs management tools.
#[derive(Debug, Args)]
pub struct ZfsOpts {
    /// Path to the `zfs` binary.
    #[clap(long, global = true, env = "PGCOW_ZFS_BIN", default_value = DEFAULT_ZFS_BIN)]
    zfs_bin: PathBuf,
    /// Path to the `zpool` binary.
    #[clap(long, global = true, env = "PGCOW_ZPOOL_BIN", default_value = DEFAULT_ZPOOL_BIN)]
    zpool_bin: PathBuf,
    /// Never run the zfs tools through `sudo -n`.
    #[clap(long, global = true, env = "PGCOW_NO_SUDO")]
    no_sudo: bool,
}

/// Create a new zfs instance from the command line options.
pub fn get_zfs_instance(opts: &ZfsOpts) -> ZfsCommand {
    let zfs = ZfsCommand::new(&opts.zfs_bin, &opts.zpool_bin);
    if opts.no_sudo {
        zfs.sudo(false)
    } else {
        zfs
    }
}
