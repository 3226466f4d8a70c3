//! Configuration with multi-source loading.
//!
//! Priority: CLI flags > `THEMESYNC_*` environment > `themesync.toml`
//! (selected `[environments.<name>]` table over top-level keys) > defaults.

mod defaults;
mod loading;
mod validation;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use defaults::*;
pub use loading::{ConfigOverrides, CONFIG_FILE, ENV_PREFIX};

/// Settings shared by `push` and `dev`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemesyncConfig {
    /// Store name or domain; `my-shop` becomes `my-shop.myshopify.com`.
    #[serde(default)]
    pub store: Option<String>,

    /// Admin API password or theme access token.
    #[serde(default)]
    pub password: Option<String>,

    /// Token for storefront rendering on password-protected stores.
    #[serde(default)]
    pub storefront_token: Option<String>,

    /// Theme id, or the name to give a newly created theme.
    #[serde(default)]
    pub theme: Option<String>,

    /// Theme root directory.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(default)]
    pub only: Vec<String>,

    /// Never delete remote files that are missing locally.
    #[serde(default)]
    pub nodelete: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upload local edits in the background while `dev` runs.
    #[serde(default = "default_live_sync")]
    pub live_sync: bool,

    /// Root of a theme app extension previewed next to the theme.
    #[serde(default)]
    pub extension_path: Option<PathBuf>,
}

impl Default for ThemesyncConfig {
    fn default() -> Self {
        Self {
            store: None,
            password: None,
            storefront_token: None,
            theme: None,
            path: default_path(),
            ignore: Vec::new(),
            only: Vec::new(),
            nodelete: false,
            host: default_host(),
            port: default_port(),
            concurrency: default_concurrency(),
            live_sync: default_live_sync(),
            extension_path: None,
        }
    }
}
