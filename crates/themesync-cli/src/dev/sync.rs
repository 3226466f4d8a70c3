//! Background upload of local edits to the development theme.

use std::sync::Arc;

use themesync_core::{
    FileEvent, FileEventKind, KeyLocks, OverrideScope, SyncOptions, SyncPlan, SyncResult,
    Uploader,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::dev::SharedContext;

/// Uploads local edits to the development theme while the preview runs. Work
/// for one key is serialized; different keys sync in parallel.
pub struct LiveSync {
    ctx: SharedContext,
    uploader: Uploader,
    locks: KeyLocks,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl LiveSync {
    /// Live sync for the context's theme. Uploads go one request at a time and
    /// never publish.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Session context; its index provides file contents
    /// * `cancel` - Stops [`LiveSync::spawn`]'s listener
    pub fn new(ctx: SharedContext, cancel: CancellationToken) -> Self {
        let uploader = Uploader::new(ctx.api.clone(), ctx.theme.id).with_options(SyncOptions {
            concurrency: 1,
            publish: false,
        });
        Self {
            ctx,
            uploader,
            locks: KeyLocks::new(),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Push one change. Changes to the same key run one at a time.
    ///
    /// After a successful upload the key's override is dropped, unless a newer
    /// edit replaced it in the meantime.
    pub async fn sync(&self, event: &FileEvent) -> themesync_core::Result<SyncResult> {
        self.locks.serialize(&event.key, self.apply(event)).await
    }

    async fn apply(&self, event: &FileEvent) -> themesync_core::Result<SyncResult> {
        let key = event.key.as_str();
        match event.kind {
            FileEventKind::Added | FileEventKind::Modified => {
                let uploaded = self
                    .ctx
                    .index
                    .read(key)
                    .and_then(|asset| asset.content.as_text().map(str::to_string));
                let result = self
                    .uploader
                    .apply(&SyncPlan::upload(key), &self.ctx.index)
                    .await?;
                if result.failed.is_empty() {
                    if let Some(content) = uploaded {
                        self.ctx
                            .overrides
                            .clear_if_unchanged(OverrideScope::Theme, key, &content);
                    }
                }
                Ok(result)
            }
            FileEventKind::Removed if self.ctx.config.no_delete => {
                tracing::debug!(key, "keeping remote file");
                Ok(SyncResult::default())
            }
            FileEventKind::Removed => {
                self.uploader
                    .apply(&SyncPlan::delete(key), &self.ctx.index)
                    .await
            }
        }
    }

    /// Sync every index event in the background until cancelled.
    pub fn spawn(self: Arc<Self>, mut rx: broadcast::Receiver<FileEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "live sync fell behind, run push to catch up");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                let this = self.clone();
                self.tracker.spawn(async move {
                    this.report(&event).await;
                });
            }
        })
    }

    async fn report(&self, event: &FileEvent) {
        match self.sync(event).await {
            Ok(result) if result.failed.is_empty() => {
                if !result.succeeded.is_empty() {
                    crate::ui::success(&format!("Synced {}", event.key));
                }
            }
            Ok(result) => {
                for failure in &result.failed {
                    crate::ui::warning(&format!(
                        "Failed to sync {}: {}",
                        failure.key, failure.error
                    ));
                }
            }
            Err(err) => {
                crate::ui::warning(&format!("Failed to sync {}: {}", event.key, err));
            }
        }
    }

    /// Stop taking new work and wait for in-flight uploads.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
