use clap::{Args, Subcommand};
use std::path::PathBuf;

use themesync_core::merge::DEFAULT_MARKER_SIZE;

use crate::config::ConfigOverrides;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload local changes to a remote theme
    ///
    /// Compares checksums, uploads what differs and deletes remote files that
    /// no longer exist locally (unless --nodelete).
    Push(PushArgs),

    /// Start the local preview server
    ///
    /// Pages render through the remote store with local edits substituted.
    /// Edited sections are re-rendered and swapped in without a reload.
    Dev(DevArgs),

    /// Merge driver for files with environment blocks
    ///
    /// Called by git as `themesync merge-driver %O %A %B %L`. Exits 0 on a
    /// clean merge, 1 when conflicts remain and 2 when the driver failed.
    MergeDriver(MergeDriverArgs),

    /// Register the environment-block merge driver in this repository
    GitSetup(GitSetupArgs),
}

/// Options shared by commands that talk to a store.
#[derive(Args, Debug, Clone, Default)]
pub struct ThemeArgs {
    /// Theme directory
    #[arg(long, value_name = "DIR")]
    pub path: Option<PathBuf>,

    /// Store name or domain (e.g. my-shop or my-shop.myshopify.com)
    #[arg(short, long)]
    pub store: Option<String>,

    /// Admin API password or theme access token
    #[arg(long)]
    pub password: Option<String>,

    /// Theme id, or the name for a newly created theme
    #[arg(short, long)]
    pub theme: Option<String>,

    /// Skip files matching this pattern (repeatable)
    #[arg(short = 'x', long, value_name = "PATTERN")]
    pub ignore: Vec<String>,

    /// Only sync files matching this pattern (repeatable)
    #[arg(short, long, value_name = "PATTERN")]
    pub only: Vec<String>,

    /// Never delete remote files missing locally
    #[arg(long)]
    pub nodelete: bool,

    /// Environment table from themesync.toml to apply
    #[arg(short, long, value_name = "NAME")]
    pub environment: Option<String>,

    /// Config file (defaults to ./themesync.toml when present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl ThemeArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            store: self.store.clone(),
            password: self.password.clone(),
            theme: self.theme.clone(),
            path: self.path.clone(),
            ignore: (!self.ignore.is_empty()).then(|| self.ignore.clone()),
            only: (!self.only.is_empty()).then(|| self.only.clone()),
            nodelete: self.nodelete.then_some(true),
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PushArgs {
    #[command(flatten)]
    pub theme: ThemeArgs,

    /// Publish the theme after every file uploaded successfully
    #[arg(long)]
    pub publish: bool,

    /// Create a new unpublished theme and push to it
    #[arg(short, long, conflicts_with = "publish")]
    pub unpublished: bool,

    /// Maximum concurrent requests to the store
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Print the result as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl PushArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            concurrency: self.concurrency,
            ..self.theme.overrides()
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct DevArgs {
    #[command(flatten)]
    pub theme: ThemeArgs,

    /// Interface to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on; the next free port is used when busy
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Storefront token for password-protected stores
    #[arg(long)]
    pub storefront_token: Option<String>,

    /// Theme app extension to preview next to the theme
    #[arg(long, value_name = "DIR")]
    pub extension_path: Option<PathBuf>,

    /// Do not upload local edits while the server runs
    #[arg(long)]
    pub no_live_sync: bool,

    /// Open the preview in the default browser
    #[arg(long)]
    pub open: bool,
}

impl DevArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            storefront_token: self.storefront_token.clone(),
            extension_path: self.extension_path.clone(),
            live_sync: self.no_live_sync.then_some(false),
            ..self.theme.overrides()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct MergeDriverArgs {
    /// Common ancestor version (%O)
    pub base: PathBuf,

    /// Our version (%A); receives the merge result
    pub current: PathBuf,

    /// Their version (%B)
    pub incoming: PathBuf,

    /// Conflict marker length (%L)
    #[arg(default_value_t = DEFAULT_MARKER_SIZE)]
    pub marker_size: usize,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GitSetupArgs {
    /// Repository root
    #[arg(long, value_name = "DIR")]
    pub path: Option<PathBuf>,

    /// Remove the merge driver registration instead
    #[arg(long)]
    pub reset: bool,
}
