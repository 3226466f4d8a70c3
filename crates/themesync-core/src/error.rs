//! Error types for the sync engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Engine errors. Per-asset variants are reported and the run continues;
/// the rest end the operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot read local file for {key}: {reason}")]
    ChecksumUnreadable { key: String, reason: String },

    #[error("remote rejected {key}: {message}")]
    AssetRejected { key: String, message: String },

    #[error("theme {theme_id} is not ready: {reason}\n\nHint: {hint}")]
    ThemeNotReady {
        theme_id: u64,
        reason: NotReadyReason,
        hint: String,
    },

    #[error("render request for {path} failed: {message}")]
    RenderForward { path: String, message: String },

    #[error("key {key} is scheduled for both upload and delete")]
    PlanConflict { key: String },

    #[error("merge driver failed: {0}")]
    Merge(String),

    #[error("remote returned {status} for {operation}: {message}")]
    Remote {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("theme root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why the readiness gate gave up on a theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReadyReason {
    Missing,
    StillProcessing(Duration),
}

impl std::fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotReadyReason::Missing => write!(f, "theme does not exist on the remote store"),
            NotReadyReason::StillProcessing(waited) => {
                write!(f, "still processing after {}s", waited.as_secs())
            }
        }
    }
}

impl SyncError {
    pub fn remote(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        SyncError::Remote {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Whether the error is contained to a single asset rather than the session.
    pub fn is_per_asset(&self) -> bool {
        matches!(
            self,
            SyncError::ChecksumUnreadable { .. } | SyncError::AssetRejected { .. }
        )
    }
}
