//! Themesync CLI - push themes and preview local edits with hot reload.
//!
//! The engine lives in `themesync-core`; this crate wires it to a terminal.
//!
//! - [`error`] - Error types with actionable hints
//! - [`logger`] - Structured logging with tracing
//! - [`ui`] - Spinners, progress bars and formatted output
//! - [`config`] - `themesync.toml`, environment variables and flags
//! - [`dev`] - Preview proxy, hot reload and live sync
//! - `commands` - Individual command implementations

pub mod cli;
pub mod commands;
pub mod config;
pub mod dev;
pub mod error;
pub mod logger;
pub mod ui;

pub use error::{CliError, ConfigError, Result, ResultExt};
