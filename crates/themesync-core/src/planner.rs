//! Reconciliation of a local and a remote checksum manifest.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::types::ChecksumManifest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Never schedule remote deletions.
    pub no_delete: bool,
}

/// Keys to upload, delete and leave alone. Every key of either manifest lands
/// in exactly one set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub to_upload: Vec<String>,
    pub to_delete: Vec<String>,
    pub unchanged: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }

    /// A plan that uploads exactly one key.
    pub fn upload(key: impl Into<String>) -> Self {
        Self {
            to_upload: vec![key.into()],
            ..Self::default()
        }
    }

    /// A plan that deletes exactly one key.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            to_delete: vec![key.into()],
            ..Self::default()
        }
    }

    /// Upload keys grouped by phase, in the order phases must run.
    pub fn upload_phases(&self) -> Vec<(UploadPhase, Vec<String>)> {
        UploadPhase::ORDER
            .iter()
            .map(|phase| {
                let keys = self
                    .to_upload
                    .iter()
                    .filter(|key| UploadPhase::of(key) == *phase)
                    .cloned()
                    .collect::<Vec<_>>();
                (*phase, keys)
            })
            .filter(|(_, keys)| !keys.is_empty())
            .collect()
    }

    /// Delete keys in the order they must go: JSON templates first, since
    /// they reference the sections and snippets removed after them.
    pub fn delete_phases(&self) -> Vec<Vec<String>> {
        let (json, other): (Vec<String>, Vec<String>) =
            self.to_delete.iter().cloned().partition(|key| {
                matches!(
                    UploadPhase::of(key),
                    UploadPhase::Json | UploadPhase::ContextualizedJson
                )
            });
        [json, other]
            .into_iter()
            .filter(|keys| !keys.is_empty())
            .collect()
    }
}

/// Upload ordering for remotes that validate references between files.
/// Liquid carries the section schemas that JSON templates and config point at,
/// so it goes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Liquid,
    Json,
    ContextualizedJson,
    Config,
    Static,
}

static CONFIG_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^config/(settings_schema|settings_data)\.json$").unwrap());
static CONTEXTUALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.context\.[^.]+\.json$").unwrap());

impl UploadPhase {
    pub const ORDER: [UploadPhase; 5] = [
        UploadPhase::Liquid,
        UploadPhase::Json,
        UploadPhase::ContextualizedJson,
        UploadPhase::Config,
        UploadPhase::Static,
    ];

    pub fn of(key: &str) -> Self {
        if key.ends_with(".liquid") {
            UploadPhase::Liquid
        } else if CONFIG_FILE.is_match(key) {
            UploadPhase::Config
        } else if key.starts_with("assets/") {
            UploadPhase::Static
        } else if CONTEXTUALIZED.is_match(key) {
            UploadPhase::ContextualizedJson
        } else if key.ends_with(".json") && !key.starts_with("config/") {
            UploadPhase::Json
        } else {
            UploadPhase::Static
        }
    }
}

/// Work out which keys must move to make `remote` match `local`.
pub fn plan(local: &ChecksumManifest, remote: &ChecksumManifest, options: &PlanOptions) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (key, checksum) in local.iter() {
        match remote.get(key) {
            Some(remote_checksum) if remote_checksum == checksum => {
                plan.unchanged.push(key.to_string())
            }
            _ => plan.to_upload.push(key.to_string()),
        }
    }

    if !options.no_delete {
        plan.to_delete = remote
            .keys()
            .filter(|key| !local.contains(key))
            .map(str::to_string)
            .collect();
    }

    plan.to_upload
        .sort_by_key(|key| UploadPhase::ORDER.iter().position(|p| *p == UploadPhase::of(key)));

    tracing::debug!(
        upload = plan.to_upload.len(),
        delete = plan.to_delete.len(),
        unchanged = plan.unchanged.len(),
        "sync plan"
    );
    plan
}
