//! Theme sync engine.
//!
//! Keeps a local theme directory and a remote theme consistent:
//!
//! - [`checksum`] computes content hashes in the remote's canonical form.
//! - [`theme_fs::ThemeFileIndex`] holds the local tree in memory and publishes changes.
//! - [`planner::plan`] diffs two checksum manifests into a [`planner::SyncPlan`].
//! - [`uploader::Uploader`] applies a plan with bounded concurrency and per-file results.
//! - [`readiness::ReadinessGate`] waits for a freshly created theme to become usable.
//! - [`merge`] reconciles environment blocks during version control merges.
//!
//! The remote store and storefront are reached through the [`api::ThemeApi`] and
//! [`storefront::Storefront`] traits.

pub mod api;
pub mod checksum;
pub mod error;
pub mod ignore;
pub mod key_locks;
pub mod merge;
pub mod overrides;
pub mod planner;
pub mod readiness;
pub mod storefront;
pub mod theme_fs;
pub mod types;
pub mod uploader;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use api::{AdminClient, AssetOutcome, AssetUpload, ThemeApi};
pub use error::{NotReadyReason, Result, SyncError};
pub use ignore::IgnoreMatcher;
pub use key_locks::KeyLocks;
pub use overrides::{OverrideScope, OverrideStore};
pub use planner::{plan, PlanOptions, SyncPlan, UploadPhase};
pub use readiness::ReadinessGate;
pub use storefront::{
    HttpStorefront, PassthroughRequest, RenderRequest, RenderedResponse, Storefront,
};
pub use theme_fs::{FileEvent, FileEventKind, FileStat, ThemeFileIndex};
pub use types::{Asset, AssetContent, ChecksumManifest, Session, Theme, ThemeRole};
pub use uploader::{Operation, SyncFailure, SyncOptions, SyncResult, Uploader};
