//! Themesync - theme sync and live preview.
//!
//! Parses arguments, initializes logging and dispatches to the command.

use clap::Parser;
use miette::Result;
use themesync_cli::{cli, commands, error, logger, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);
    ui::init_colors(args.no_color);

    let result = match args.command {
        cli::Command::Push(push_args) => commands::push_execute(push_args).await,
        cli::Command::Dev(dev_args) => commands::dev_execute(dev_args).await,
        // Git reads the exit status, not a diagnostic.
        cli::Command::MergeDriver(merge_args) => {
            std::process::exit(commands::merge_driver_execute(merge_args))
        }
        cli::Command::GitSetup(setup_args) => commands::git_setup_execute(setup_args),
    };

    result.map_err(error::cli_error_to_miette)
}
