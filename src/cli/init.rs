use crate::data_directory::DataDirectory;
use crate::{Error, Handler, Result};
use clap::Args;
use std::fs;
use std::path::Path;
use zfs::{path, Dataset, Zfs, ZfsCommand};

/// Arguments for our `InitCommand`.
///
/// These arguments are parsed by `clap` and an instance of `InitCommand` containing
/// arguments is provided.
///
/// Example :
///
/// `pgcow init tank/pgdata`
///
/// The `handler` method provided below will be executed.
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Name of a zfs dataset used as a data directory.
    dataset: String,
}

impl Handler for InitCommand {
    fn handler(&self, zfs: &ZfsCommand) -> Result<()> {
        init(zfs, &self.dataset)
    }
}

/// Turn the database directories of the data directory mounted from `dataset_name`
/// into datasets.
fn init<Z: Zfs>(zfs: &Z, dataset_name: &str) -> Result<()> {
    let dataset = Dataset::by_name(zfs, dataset_name)?;
    let mountpoint = dataset
        .mountpoint()
        .ok_or_else(|| Error::NotMounted(dataset_name.to_string()))?;

    log::info!(
        "zfs dataset '{}' is mounted at {}",
        dataset.name(),
        mountpoint
    );

    if !DataDirectory::is(Path::new(&mountpoint)) {
        return Err(Error::NotADataDirectory(mountpoint));
    }

    log::debug!("'{}' appears to be a valid pg data directory", mountpoint);
    let data_directory = DataDirectory::new(&mountpoint);

    if data_directory.has_tablespaces() {
        return Err(Error::Tablespaces(mountpoint));
    }

    log::debug!("'{}' does not have custom tablespaces", mountpoint);

    if data_directory.is_running() {
        return Err(Error::ServerRunning(mountpoint));
    }

    let paths = data_directory.paths();
    if paths.pgcow_version.exists() {
        return Err(Error::AlreadyInitialized(mountpoint));
    }

    let databases_directory = paths.databases.to_string_lossy().into_owned();
    let databases_name = path::leaf(&databases_directory)
        .ok_or_else(|| Error::NotADataDirectory(mountpoint.clone()))?;

    log::debug!(
        "transforming pg databases directory '{}' into zfs dataset",
        databases_directory
    );

    let databases_dataset = Dataset::create(&dataset, &databases_name)?;

    log::info!(
        "transformed pg databases directory '{}' into a zfs dataset named '{}'",
        databases_directory,
        databases_dataset.name()
    );

    for (oid, path) in data_directory.database_directories() {
        log::debug!(
            "transforming pg database directory '{}' (oid: {}) into zfs dataset",
            path.display(),
            oid
        );

        Dataset::create(&databases_dataset, &oid)?;

        log::info!(
            "transformed pg database directory '{}' (oid: {}) into a zfs dataset",
            path.display(),
            oid
        );
    }

    log::debug!(
        "writing pgcow version file to '{}'",
        paths.pgcow_version.display()
    );

    fs::write(&paths.pgcow_version, env!("CARGO_PKG_VERSION")).map_err(|source| {
        Error::VersionFile {
            path: paths.pgcow_version.clone(),
            source,
        }
    })?;

    log::info!(
        "pgcow v{} initialized in zfs dataset '{}' ('{}')",
        env!("CARGO_PKG_VERSION"),
        dataset_name,
        mountpoint
    );

    Ok(())
}
