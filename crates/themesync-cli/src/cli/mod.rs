//! Command-line interface definition.
//!
//! - `themesync push` - reconcile the remote theme with the local directory
//! - `themesync dev` - local preview proxy with hot reload and live sync
//! - `themesync merge-driver` - environment-block merge driver for git
//! - `themesync git-setup` - register the merge driver in a repository

mod commands;

use clap::Parser;

pub use commands::{Command, DevArgs, GitSetupArgs, MergeDriverArgs, PushArgs, ThemeArgs};

/// Themesync - theme sync and live preview
#[derive(Parser, Debug)]
#[command(
    name = "themesync",
    version,
    about = "Sync a local theme with a remote store and preview edits live",
    long_about = "Themesync keeps a local theme directory and a remote theme consistent.\n\
                  It pushes only what changed, serves a local preview that renders through\n\
                  the store with your unsaved edits, and hot reloads edited sections."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}
