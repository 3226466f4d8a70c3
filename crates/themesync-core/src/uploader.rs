//! Applies a [`SyncPlan`] to the remote theme.
//!
//! Deletes and uploads are independent per key: one failure is recorded and
//! the rest carry on. Uploads go out phase by phase (see
//! [`UploadPhase`](crate::planner::UploadPhase)), batched by file count and
//! byte size, with at most `concurrency` requests in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::api::{AssetUpload, ThemeApi};
use crate::error::{Result, SyncError};
use crate::planner::SyncPlan;
use crate::theme_fs::ThemeFileIndex;
use crate::types::Asset;

pub const MAX_BATCH_FILE_COUNT: usize = 10;
pub const MAX_BATCH_BYTESIZE: u64 = 100 * 1024;
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub key: String,
    pub operation: Operation,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<SyncFailure>,
    pub published: bool,
    /// Why a requested publish did not happen.
    pub publish_skipped: Option<String>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.publish_skipped.is_none()
    }

    pub fn upload_failures(&self) -> impl Iterator<Item = &SyncFailure> {
        self.failed
            .iter()
            .filter(|f| f.operation == Operation::Upload)
    }

    fn record(&mut self, key: String, operation: Operation, outcome: std::result::Result<(), String>) {
        match outcome {
            Ok(()) => self.succeeded.push(key),
            Err(error) => {
                tracing::warn!(key, ?operation, error, "sync failed");
                self.failed.push(SyncFailure {
                    key,
                    operation,
                    error,
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub concurrency: usize,
    pub publish: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            publish: false,
        }
    }
}

/// Called once per finished key with whether it succeeded.
pub type ProgressFn = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Applies sync plans to one remote theme.
pub struct Uploader {
    api: Arc<dyn ThemeApi>,
    theme_id: u64,
    options: SyncOptions,
    progress: Option<ProgressFn>,
}

type KeyOutcome = (String, std::result::Result<(), String>);

impl Uploader {
    pub fn new(api: Arc<dyn ThemeApi>, theme_id: u64) -> Self {
        Self {
            api,
            theme_id,
            options: SyncOptions::default(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run `plan` against the remote theme, reading contents from `index`.
    ///
    /// Deletes go first (JSON templates before the files they reference), then
    /// uploads phase by phase. Each key ends up in `succeeded` or `failed`; one
    /// failure never stops the others.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PlanConflict`] before any request when a key is both
    /// uploaded and deleted.
    pub async fn apply(&self, plan: &SyncPlan, index: &ThemeFileIndex) -> Result<SyncResult> {
        check_disjoint(plan)?;
        let concurrency = self.options.concurrency.max(1);
        let mut result = SyncResult::default();

        for keys in plan.delete_phases() {
            let deleted: Vec<KeyOutcome> = stream::iter(keys)
                .map(|key| async move {
                    let outcome = self
                        .api
                        .delete_asset(self.theme_id, &key)
                        .await
                        .map_err(|e| e.to_string());
                    (key, outcome)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
            for (key, outcome) in deleted {
                self.report(&key, outcome.is_ok());
                result.record(key, Operation::Delete, outcome);
            }
        }

        for (phase, keys) in plan.upload_phases() {
            tracing::debug!(?phase, files = keys.len(), "uploading phase");
            let mut assets = Vec::with_capacity(keys.len());
            for key in keys {
                match index.read(&key) {
                    Some(asset) => assets.push(asset),
                    None => {
                        let error = SyncError::ChecksumUnreadable {
                            key: key.clone(),
                            reason: "file is no longer present locally".to_string(),
                        };
                        self.report(&key, false);
                        result.record(key, Operation::Upload, Err(error.to_string()));
                    }
                }
            }

            let uploaded: Vec<Vec<KeyOutcome>> = stream::iter(batch_assets(assets))
                .map(|batch| self.upload_batch(batch))
                .buffer_unordered(concurrency)
                .collect()
                .await;
            for (key, outcome) in uploaded.into_iter().flatten() {
                self.report(&key, outcome.is_ok());
                result.record(key, Operation::Upload, outcome);
            }
        }

        if self.options.publish {
            let failed_uploads = result.upload_failures().count();
            if failed_uploads > 0 {
                let reason = format!("{failed_uploads} file(s) failed to upload");
                tracing::warn!(theme_id = self.theme_id, "skipping publish: {reason}");
                result.publish_skipped = Some(reason);
            } else {
                match self.api.publish_theme(self.theme_id).await {
                    Ok(()) => result.published = true,
                    Err(err) => result.publish_skipped = Some(err.to_string()),
                }
            }
        }

        Ok(result)
    }

    async fn upload_batch(&self, batch: Vec<Arc<Asset>>) -> Vec<KeyOutcome> {
        let uploads: Vec<AssetUpload> = batch
            .iter()
            .map(|asset| AssetUpload {
                key: asset.key.clone(),
                content: asset.content.clone(),
            })
            .collect();

        match self.api.bulk_upload(self.theme_id, uploads).await {
            Ok(outcomes) => {
                let mut by_key: HashMap<String, std::result::Result<(), String>> = outcomes
                    .into_iter()
                    .map(|o| {
                        let outcome = if o.success {
                            Ok(())
                        } else {
                            Err(SyncError::AssetRejected {
                                key: o.key.clone(),
                                message: o.errors.join("; "),
                            }
                            .to_string())
                        };
                        (o.key, outcome)
                    })
                    .collect();
                batch
                    .iter()
                    .map(|asset| {
                        let outcome = by_key
                            .remove(&asset.key)
                            .unwrap_or_else(|| Err("no result returned for file".to_string()));
                        (asset.key.clone(), outcome)
                    })
                    .collect()
            }
            Err(err) => {
                let message = err.to_string();
                batch
                    .iter()
                    .map(|asset| (asset.key.clone(), Err(message.clone())))
                    .collect()
            }
        }
    }

    fn report(&self, key: &str, ok: bool) {
        if let Some(progress) = &self.progress {
            progress(key, ok);
        }
    }
}

fn check_disjoint(plan: &SyncPlan) -> Result<()> {
    let deletes: HashSet<&str> = plan.to_delete.iter().map(String::as_str).collect();
    match plan.to_upload.iter().find(|key| deletes.contains(key.as_str())) {
        Some(key) => Err(SyncError::PlanConflict { key: key.clone() }),
        None => Ok(()),
    }
}

/// Group assets into batches bounded by file count and total size. An asset
/// larger than the size limit travels alone.
pub fn batch_assets(assets: Vec<Arc<Asset>>) -> Vec<Vec<Arc<Asset>>> {
    let mut batches = Vec::new();
    let mut current: Vec<Arc<Asset>> = Vec::new();
    let mut current_size = 0u64;

    for asset in assets {
        let full = current.len() >= MAX_BATCH_FILE_COUNT
            || (!current.is_empty() && current_size + asset.size > MAX_BATCH_BYTESIZE);
        if full {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += asset.size;
        current.push(asset);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore::IgnoreMatcher;
    use crate::testing::{ApiCall, FakeThemeApi};
    use crate::types::AssetContent;
    use std::time::Duration;
    use tempfile::TempDir;

    fn theme_with(files: &[(&str, &str)]) -> (TempDir, ThemeFileIndex) {
        let dir = TempDir::new().unwrap();
        for (key, content) in files {
            let path = dir.path().join(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let index = ThemeFileIndex::mount(dir.path(), IgnoreMatcher::default()).unwrap();
        (dir, index)
    }

    fn snippets(n: usize) -> Vec<(String, String)> {
        (0..n)
            .map(|i| (format!("snippets/s{i:02}.liquid"), format!("snippet {i}")))
            .collect()
    }

    fn upload_plan(index: &ThemeFileIndex) -> SyncPlan {
        SyncPlan {
            to_upload: index.list(),
            ..SyncPlan::default()
        }
    }

    fn asset(key: &str, size: u64) -> Arc<Asset> {
        Arc::new(Asset {
            key: key.to_string(),
            checksum: String::new(),
            content: AssetContent::Text(String::new()),
            size,
            modified_at: None,
        })
    }

    #[test]
    fn batches_respect_count_and_size() {
        let small: Vec<_> = (0..25).map(|i| asset(&format!("a{i}"), 10)).collect();
        let sizes: Vec<usize> = batch_assets(small).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        let big = vec![asset("a", 60 * 1024), asset("b", 60 * 1024), asset("c", 200 * 1024)];
        let sizes: Vec<usize> = batch_assets(big).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn uploads_everything() {
        let files = snippets(12);
        let refs: Vec<(&str, &str)> = files.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let (_dir, index) = theme_with(&refs);
        let api = Arc::new(FakeThemeApi::new());

        let result = Uploader::new(api.clone(), 1)
            .apply(&upload_plan(&index), &index)
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 12);
        assert!(result.is_success());
        assert_eq!(api.stored_keys().len(), 12);
        let batches = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ApiCall::BulkUpload(_)))
            .count();
        assert_eq!(batches, 2);
    }

    #[tokio::test]
    async fn one_rejection_does_not_abort_the_rest() {
        let files = snippets(5);
        let refs: Vec<(&str, &str)> = files.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let (_dir, index) = theme_with(&refs);
        let api = Arc::new(FakeThemeApi::new());
        api.reject("snippets/s02.liquid", "Liquid syntax error");

        let result = Uploader::new(api.clone(), 1)
            .with_options(SyncOptions {
                publish: true,
                ..SyncOptions::default()
            })
            .apply(&upload_plan(&index), &index)
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 4);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].key, "snippets/s02.liquid");
        assert!(result.failed[0].error.contains("Liquid syntax error"));
        assert!(!result.published);
        assert!(result.publish_skipped.is_some());
        assert!(!api.calls().iter().any(|c| matches!(c, ApiCall::Publish(_))));
    }

    #[tokio::test]
    async fn publishes_once_after_clean_upload() {
        let (_dir, index) = theme_with(&[("sections/hero.liquid", "hero")]);
        let api = Arc::new(FakeThemeApi::new());

        let result = Uploader::new(api.clone(), 7)
            .with_options(SyncOptions {
                publish: true,
                ..SyncOptions::default()
            })
            .apply(&upload_plan(&index), &index)
            .await
            .unwrap();

        assert!(result.published);
        let publishes: Vec<_> = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ApiCall::Publish(_)))
            .collect();
        assert_eq!(publishes, vec![ApiCall::Publish(7)]);
    }

    #[tokio::test]
    async fn conflicting_plan_fails_before_any_call() {
        let (_dir, index) = theme_with(&[("sections/hero.liquid", "hero")]);
        let api = Arc::new(FakeThemeApi::new());
        let plan = SyncPlan {
            to_upload: vec!["sections/hero.liquid".into()],
            to_delete: vec!["sections/hero.liquid".into()],
            unchanged: vec![],
        };

        let err = Uploader::new(api.clone(), 1).apply(&plan, &index).await;
        assert!(matches!(err, Err(SyncError::PlanConflict { .. })));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn deletes_are_independent() {
        let (_dir, index) = theme_with(&[]);
        let api = Arc::new(FakeThemeApi::new());
        api.put("snippets/a.liquid", "a");
        api.put("snippets/b.liquid", "b");
        api.fail_delete("snippets/a.liquid");

        let plan = SyncPlan {
            to_delete: vec!["snippets/a.liquid".into(), "snippets/b.liquid".into()],
            ..SyncPlan::default()
        };
        let result = Uploader::new(api.clone(), 1).apply(&plan, &index).await.unwrap();

        assert_eq!(result.succeeded, vec!["snippets/b.liquid"]);
        assert_eq!(result.failed[0].operation, Operation::Delete);
        assert_eq!(api.stored_keys(), vec!["snippets/a.liquid"]);
    }

    #[tokio::test]
    async fn json_templates_deleted_before_what_they_reference() {
        let (_dir, index) = theme_with(&[]);
        let api = Arc::new(FakeThemeApi::new().with_latency(Duration::from_millis(1)));
        let plan = SyncPlan {
            to_delete: vec![
                "sections/promo.liquid".into(),
                "snippets/badge.liquid".into(),
                "templates/page.promo.json".into(),
                "templates/product.json".into(),
            ],
            ..SyncPlan::default()
        };

        let result = Uploader::new(api.clone(), 1)
            .with_options(SyncOptions {
                concurrency: 4,
                publish: false,
            })
            .apply(&plan, &index)
            .await
            .unwrap();
        assert_eq!(result.succeeded.len(), 4);

        let deletes: Vec<String> = api
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Delete(key) => Some(key),
                _ => None,
            })
            .collect();
        let last_json = deletes.iter().rposition(|k| k.ends_with(".json")).unwrap();
        let first_liquid = deletes.iter().position(|k| k.ends_with(".liquid")).unwrap();
        assert!(last_json < first_liquid, "{deletes:?}");
    }

    #[tokio::test]
    async fn vanished_file_recorded_as_failure() {
        let (_dir, index) = theme_with(&[("snippets/a.liquid", "a")]);
        let plan = SyncPlan::upload("snippets/gone.liquid");
        let api = Arc::new(FakeThemeApi::new());

        let result = Uploader::new(api, 1).apply(&plan, &index).await.unwrap();
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].error.contains("cannot read local file"));
    }

    #[tokio::test]
    async fn transport_failure_is_limited_to_its_batch() {
        let files = snippets(15);
        let refs: Vec<(&str, &str)> = files.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let (_dir, index) = theme_with(&refs);
        let api = Arc::new(FakeThemeApi::new());
        api.fail_batch_containing("snippets/s12.liquid");

        let result = Uploader::new(api, 1)
            .apply(&upload_plan(&index), &index)
            .await
            .unwrap();
        assert_eq!(result.succeeded.len(), 10);
        assert_eq!(result.failed.len(), 5);
    }

    #[tokio::test]
    async fn failure_mid_batch_keeps_earlier_successes() {
        let files = snippets(3);
        let refs: Vec<(&str, &str)> = files.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let (_dir, index) = theme_with(&refs);
        let api = Arc::new(FakeThemeApi::new());
        api.fail_from("snippets/s01.liquid");

        let result = Uploader::new(api.clone(), 1)
            .apply(&upload_plan(&index), &index)
            .await
            .unwrap();

        assert_eq!(result.succeeded, vec!["snippets/s00.liquid"]);
        let failed: Vec<&str> = result.failed.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, vec!["snippets/s01.liquid", "snippets/s02.liquid"]);
        assert!(result.failed[0].error.contains("503"));
        assert_eq!(api.stored_keys(), vec!["snippets/s00.liquid"]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let files: Vec<(String, String)> = (0..40)
            .map(|i| (format!("assets/f{i:02}.png"), "x".repeat(60 * 1024)))
            .collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let (_dir, index) = theme_with(&refs);
        let api = Arc::new(FakeThemeApi::new().with_latency(Duration::from_millis(5)));

        let result = Uploader::new(api.clone(), 1)
            .with_options(SyncOptions {
                concurrency: 3,
                publish: false,
            })
            .apply(&upload_plan(&index), &index)
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 40);
        assert!(api.max_in_flight() <= 3);
    }

    #[tokio::test]
    async fn progress_reported_per_key() {
        let (_dir, index) = theme_with(&[("snippets/a.liquid", "a"), ("snippets/b.liquid", "b")]);
        let api = Arc::new(FakeThemeApi::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        Uploader::new(api, 1)
            .on_progress(Arc::new(move |key, ok| sink.lock().push((key.to_string(), ok))))
            .apply(&upload_plan(&index), &index)
            .await
            .unwrap();

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("snippets/a.liquid".to_string(), true),
                ("snippets/b.liquid".to_string(), true)
            ]
        );
    }
}
