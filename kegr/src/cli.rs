// kegr/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use kegr_common::config::Config;
use kegr_common::error::{KegrError, Result};

pub mod info;
pub mod install;
pub mod post_install;
pub mod search;

use crate::cli::info::Info;
use crate::cli::install::InstallArgs;
use crate::cli::post_install::PostInstall;
use crate::cli::search::Search;
use crate::cli::test::Test;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "kegr", bin_name = "kegr")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a formula from source into its keg
    Install(InstallArgs),
    /// Re-run a formula's post-install steps
    PostInstall(PostInstall),
    /// Run a formula's verification steps against its installed keg
    Test(Test),
    /// Show a formula's metadata
    Info(Info),
    /// Search a documentation store the way the docs site does
    Search(Search),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config).await,
            Self::PostInstall(command) => command.run(config).await,
            Self::Test(command) => command.run(config).await,
            Self::Info(command) => command.run(config).await,
            Self::Search(command) => command.run(config).await,
        }
    }
}

/// Prints a `==> ` progress line.
pub fn ohai(message: &str) {
    println!("{}{}", "==> ".bold().blue(), message.bold());
}

/// Runs a synchronous pipeline phase off the async runtime.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KegrError::Generic(format!("Build task failed to complete: {e}")))?
}
