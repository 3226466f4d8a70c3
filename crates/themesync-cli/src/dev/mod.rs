//! Local preview server.
//!
//! - [`server`] routes browser requests: local assets, the hot-reload channel,
//!   and page renders through the remote storefront with local overrides.
//! - [`hot_reload`] turns file events into browser updates.
//! - [`sync`] uploads local edits to the development theme in the background.
//! - [`watcher`] feeds filesystem changes into the theme index.
//! - [`asset`] serves local theme assets on CDN paths.

pub mod asset;
pub mod config;
pub mod error_page;
pub mod hot_reload;
pub mod proxy;
pub mod server;
pub mod state;
pub mod sync;
pub mod watcher;

pub use config::DevConfig;
pub use hot_reload::{HotReloader, ReloadState};
pub use server::{build_router, DevServer};
pub use state::{DevServerContext, SharedContext};
pub use sync::LiveSync;
pub use watcher::{FileChange, FileWatcher};

use serde::{Deserialize, Serialize};

/// Messages sent to browsers on the hot-reload channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HotReloadEvent {
    /// First message on every connection.
    Open {
        pid: u32,
        #[serde(rename = "themeId")]
        theme_id: u64,
    },

    /// Fresh markup for one section.
    Section {
        key: String,
        #[serde(rename = "sectionId")]
        section_id: String,
        content: String,
    },

    /// A stylesheet changed; refresh matching `<link>` tags.
    Css { key: String },

    /// Reload the page.
    Full { key: String },

    Error { key: String, message: String },
}
