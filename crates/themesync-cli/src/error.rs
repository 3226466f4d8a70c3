//! Error types for the themesync CLI.
//!
//! Commands return [`CliError`]. Domain failures from the engine arrive as
//! [`SyncError`] and configuration problems as [`ConfigError`]; both convert
//! automatically. Messages carry a `Hint:` line where the user can act on it.
//!
//! ```rust,no_run
//! use themesync_cli::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_layout(root: &Path) -> Result<String> {
//!     let path = root.join("layout/theme.liquid");
//!     std::fs::read_to_string(&path)
//!         .with_path(&path)
//!         .with_hint("Run the command from the theme root or pass --path")
//! }
//! ```

use std::path::PathBuf;

use themesync_core::SyncError;
use thiserror::Error;

mod miette;

pub use self::miette::cli_error_to_miette;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid theme configuration: {0}")]
    Config(#[from] ConfigError),

    /// Engine failures: remote calls, readiness, merge internals.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Some files did not reach the remote theme.
    #[error("{failed} of {total} file operations failed\n\nHint: Re-run the command to retry the failed files")]
    PartialSync { failed: usize, total: usize },

    #[error("No such theme file: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Filesystem access failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preview server failed: {0}")]
    Server(String),

    #[error("Could not watch theme directory: {0}")]
    Watch(#[from] notify::Error),

    #[error("Git setup failed: {0}")]
    Git(String),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}\n\nHint: Create a themesync.toml file or drop the --config flag", .0.display())]
    NotFound(PathBuf),

    #[error("Environment '{0}' not found in config\n\nHint: Add an [environments.{0}] table to themesync.toml")]
    EnvironmentNotFound(String),

    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField { field: String, hint: String },

    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    #[error("Could not read themesync.toml: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Attach paths, hints and context to any error convertible into [`CliError`].
pub trait ResultExt<T> {
    /// Turn a not-found I/O error into [`CliError::FileNotFound`] for `path`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;

    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            match err {
                CliError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    CliError::FileNotFound(path.as_ref().to_owned())
                }
                other => other,
            }
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{err}\n\nHint: {hint}"))
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{msg}: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use themesync_core::NotReadyReason;

    #[test]
    fn test_config_error_not_found() {
        let msg = ConfigError::NotFound(PathBuf::from("themesync.toml")).to_string();
        assert!(msg.contains("Config file not found"));
        assert!(msg.contains("themesync.toml"));
        assert!(msg.contains("Hint:"));
    }

    #[test]
    fn test_environment_not_found_names_table() {
        let msg = ConfigError::EnvironmentNotFound("staging".into()).to_string();
        assert!(msg.contains("'staging'"));
        assert!(msg.contains("[environments.staging]"));
    }

    #[test]
    fn test_sync_error_is_transparent() {
        let err: CliError = SyncError::ThemeNotReady {
            theme_id: 7,
            reason: NotReadyReason::StillProcessing(Duration::from_secs(300)),
            hint: "try again later".into(),
        }
        .into();
        assert!(matches!(err, CliError::Sync(_)));
        assert!(err.to_string().contains("7"));
    }

    #[test]
    fn test_partial_sync_message() {
        let msg = CliError::PartialSync { failed: 2, total: 9 }.to_string();
        assert!(msg.starts_with("2 of 9"));
        assert!(msg.contains("Hint:"));
    }

    #[test]
    fn test_result_ext_with_path() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let err = result.with_path("/theme/layout/theme.liquid").unwrap_err();
        assert!(matches!(err, CliError::FileNotFound(_)));
    }

    #[test]
    fn test_result_ext_with_hint_and_context() {
        let result: std::result::Result<(), ConfigError> = Err(ConfigError::MissingField {
            field: "store".into(),
            hint: "Pass --store".into(),
        });
        let msg = result.context("Failed to load config").unwrap_err().to_string();
        assert!(msg.starts_with("Failed to load config: "));

        let result: std::result::Result<(), ConfigError> =
            Err(ConfigError::NotFound(PathBuf::from("themesync.toml")));
        let msg = result.with_hint("Check the path").unwrap_err().to_string();
        assert!(msg.contains("Hint: Check the path"));
    }

    #[test]
    fn test_config_error_invalid_value() {
        let msg = ConfigError::InvalidValue {
            field: "concurrency".into(),
            value: "0".into(),
            hint: "Use a value of at least 1".into(),
        }
        .to_string();
        assert!(msg.contains("Invalid value for 'concurrency': 0"));
        assert!(msg.contains("at least 1"));
    }
}
