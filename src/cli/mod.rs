mod copy;
mod init;
mod list;

use crate::cli::copy::CopyCommand;
use crate::cli::init::InitCommand;
use crate::cli::list::ListCommand;
use crate::helper::ZfsOpts;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zfs::ZfsCommand;

/// CLI related errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Zfs(#[from] zfs::Error),
    #[error(transparent)]
    CopyDir(#[from] copydir::Error),
    #[error("zfs dataset '{0}' is not mounted")]
    NotMounted(String),
    #[error("'{0}' does not appear to be a data directory, run 'initdb -D {0}'")]
    NotADataDirectory(String),
    #[error("'{0}' has custom tablespaces, these are not supported by pgcow")]
    Tablespaces(String),
    #[error("a pg server is running and is using '{0}' as a data directory, stop the server and try again")]
    ServerRunning(String),
    #[error("pgcow already initialized in '{0}'")]
    AlreadyInitialized(String),
    #[error("failed to write pgcow version file to '{path}': {source}")]
    VersionFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode the dataset list: {0}")]
    Json(#[from] serde_json::Error),
}

/// A common result type for our CLI.
pub type Result<T> = std::result::Result<T, Error>;

/// `Handler` is a trait that should be implemented for each of our commands.
///
/// It defines the contract & the input / output of a command execution.
pub trait Handler {
    /// Executes the command handler.
    ///
    /// Every command gets the zfs instance built from the global options.
    /// Also, a command must always return a `Result<()>`.
    fn handler(&self, zfs: &ZfsCommand) -> Result<()>;
}

#[derive(Parser, Debug)]
#[clap(version, author, about)]
pub struct Cli {
    #[clap(flatten)]
    pub(crate) zfs: ZfsOpts,
    /// Log every step.
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
    /// If set, nothing is logged.
    #[clap(short, long, global = true, conflicts_with = "verbose")]
    pub(crate) quiet: bool,
    #[clap(subcommand)]
    pub(crate) command: Command,
}

impl Cli {
    /// Get the command used by the user.
    ///
    /// For example, if the user executes the command `init`,
    /// we dynamically return the command so the `main` can
    /// execute it.
    pub fn command(self) -> Box<dyn Handler> {
        match self.command {
            Command::Init(cmd) => Box::new(cmd),
            Command::List(cmd) => Box::new(cmd),
            Command::Copy(cmd) => Box::new(cmd),
        }
    }
}

/// The enumeration of our commands.
///
/// Each of our commands should be listed in this enumeration with the following format :
/// CommandName(CommandHandler)
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Turn the databases of a data directory into zfs datasets
    Init(InitCommand),
    /// List every zfs dataset
    List(ListCommand),
    /// Copy a directory, cloning it when it is a zfs dataset
    Copy(CopyCommand),
}
