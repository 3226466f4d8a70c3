//! Command implementations for the themesync CLI.
//!
//! - [`push`] - Reconcile a remote theme with the local directory
//! - [`dev`] - Local preview with hot reload and live sync
//! - [`merge_driver`] - Environment-block merge driver called by git
//! - [`git_setup`] - Register the merge driver in a repository
//!
//! Each command provides an `execute` function taking its parsed arguments.

pub mod dev;
pub mod git_setup;
pub mod merge_driver;
pub mod push;
pub mod utils;

pub use dev::execute as dev_execute;
pub use git_setup::execute as git_setup_execute;
pub use merge_driver::execute as merge_driver_execute;
pub use push::execute as push_execute;
