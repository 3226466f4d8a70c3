use std::path::PathBuf;

use themesync_core::uploader::DEFAULT_CONCURRENCY;

pub fn default_path() -> PathBuf {
    PathBuf::from(".")
}

pub fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_port() -> u16 {
    9292
}

pub fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

pub fn default_live_sync() -> bool {
    true
}
