mod cli;
mod data_directory;
mod helper;

use crate::cli::Cli;
use crate::helper::get_zfs_instance;
use clap::Parser;
use log::LevelFilter;

pub use crate::cli::{Error, Handler, Result};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    if cli.quiet {
        logger.filter_level(LevelFilter::Off);
    }
    logger.init();

    let zfs = get_zfs_instance(&cli.zfs);
    cli.command().handler(&zfs)?;

    Ok(())
}
