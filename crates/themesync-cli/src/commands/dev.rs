//! `themesync dev`: the local preview.
//!
//! Orchestrates the preview lifecycle:
//! - Resolve (or create) the development theme
//! - Optional reconcile of the remote theme with local files
//! - File watching feeding the local index
//! - Hot reload and live sync listening to index events
//! - HTTP proxy in front of the storefront
//! - Graceful shutdown on Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use themesync_core::{
    plan, AdminClient, HttpStorefront, IgnoreMatcher, OverrideScope, PlanOptions, Storefront,
    SyncOptions, Theme, ThemeApi, ThemeFileIndex, Uploader,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::DevArgs;
use crate::commands::utils;
use crate::dev::{
    watcher, DevConfig, DevServer, DevServerContext, FileChange, FileWatcher, HotReloader,
    LiveSync, SharedContext,
};
use crate::error::Result;
use crate::ui::{self, Spinner};

/// Run the preview until Ctrl+C.
///
/// # Arguments
///
/// * `args` - Parsed command-line arguments
///
/// # Errors
///
/// Returns errors for invalid configuration, an unreachable store, a missing
/// theme directory or a watcher that cannot start. Failures after startup are
/// reported and do not end the session.
pub async fn execute(args: DevArgs) -> Result<()> {
    ui::info("Starting preview server...");

    let config = utils::load_config(&args.theme, args.overrides())?;
    let session = utils::build_session(&config)?;
    let api: Arc<dyn ThemeApi> = Arc::new(AdminClient::new(session.clone())?);

    let theme = utils::resolve_theme(api.as_ref(), utils::dev_target(&config)).await?;
    let storefront: Arc<dyn Storefront> =
        Arc::new(HttpStorefront::new(session.clone(), theme.id)?);

    let dev_config = DevConfig::from_config(&config, args.open)?;
    let index = Arc::new(ThemeFileIndex::mount(
        &dev_config.root,
        utils::theme_matcher(&config),
    )?);
    ui::info(&format!(
        "Serving {} files from {}",
        index.len(),
        index.root().display()
    ));

    let mut ctx = DevServerContext::new(
        dev_config.clone(),
        session,
        theme.clone(),
        index.clone(),
        storefront,
        api.clone(),
    );
    let extension_index = match &dev_config.extension_root {
        Some(root) => {
            let extension = Arc::new(ThemeFileIndex::mount(
                root,
                IgnoreMatcher::for_theme(root, &[], &[]),
            )?);
            ui::info(&format!("Previewing extension at {}", extension.root().display()));
            ctx = ctx.with_extension_index(extension.clone());
            Some(extension)
        }
        None => None,
    };
    let ctx: SharedContext = Arc::new(ctx);

    if dev_config.live_sync {
        reconcile(api.clone(), &theme, &index, dev_config.concurrency).await;
    }

    let cancel = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let reloader = Arc::new(HotReloader::new(ctx.clone()));
    tasks.push(reloader.clone().spawn(
        index.subscribe(),
        OverrideScope::Theme,
        cancel.clone(),
    ));
    if let Some(extension) = &extension_index {
        tasks.push(reloader.clone().spawn(
            extension.subscribe(),
            OverrideScope::Extension,
            cancel.clone(),
        ));
    }

    let live_sync = dev_config.live_sync.then(|| {
        let sync = Arc::new(LiveSync::new(ctx.clone(), cancel.clone()));
        tasks.push(sync.clone().spawn(index.subscribe()));
        sync
    });
    if live_sync.is_none() {
        ui::info("Live sync disabled; edits stay local until the next push");
    }

    // Dropping a watcher stops it.
    let mut watchers = Vec::new();
    for index in std::iter::once(&index).chain(extension_index.as_ref()) {
        let (watcher, rx) =
            FileWatcher::new(index.root().to_path_buf(), dev_config.debounce_ms)?;
        ui::info(&format!("Watching for changes in: {}", watcher.root().display()));
        tasks.push(spawn_index_feeder(index.clone(), rx, watcher.debounce(), cancel.clone()));
        watchers.push(watcher);
    }

    let server = DevServer::new(ctx.clone(), cancel.clone());
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            ui::error(&e.to_string());
        }
    });

    if dev_config.open {
        open_browser(&dev_config.server_url());
    }

    ui::info("Press Ctrl+C to stop");

    let server_finished = tokio::select! {
        _ = signal::ctrl_c() => {
            ui::info("Shutting down preview server...");
            false
        }
        _ = &mut server_handle => {
            ui::warning("Server task completed unexpectedly");
            true
        }
    };

    cancel.cancel();
    drop(watchers);
    if !server_finished {
        let _ = server_handle.await;
    }
    futures::future::join_all(tasks).await;
    if let Some(sync) = live_sync {
        ui::info("Waiting for pending uploads...");
        sync.flush().await;
    }

    ui::success("Preview server stopped");
    Ok(())
}

/// Upload local files the remote theme is missing or has stale. Nothing is
/// deleted remotely; failures are reported and the preview starts anyway.
async fn reconcile(
    api: Arc<dyn ThemeApi>,
    theme: &Theme,
    index: &ThemeFileIndex,
    concurrency: usize,
) {
    let spinner = Spinner::new(&format!("Syncing local files to '{}'", theme.name));

    let remote = match api.fetch_checksums(theme.id).await {
        Ok(remote) => remote.filtered(index.matcher()),
        Err(e) => {
            spinner.fail(&format!("Could not fetch remote checksums: {}", e));
            return;
        }
    };
    let plan = plan(&index.checksums(), &remote, &PlanOptions { no_delete: true });
    if plan.is_empty() {
        spinner.finish(&format!("Theme '{}' is up to date", theme.name));
        return;
    }

    let result = Uploader::new(api, theme.id)
        .with_options(SyncOptions {
            concurrency,
            publish: false,
        })
        .apply(&plan, index)
        .await;

    match result {
        Ok(result) if result.failed.is_empty() => {
            spinner.finish(&format!("Uploaded {} files", result.succeeded.len()));
        }
        Ok(result) => {
            spinner.fail(&format!(
                "{} of {} files failed to upload",
                result.failed.len(),
                result.failed.len() + result.succeeded.len()
            ));
            for failure in &result.failed {
                ui::warning(&format!("{}: {}", failure.key, failure.error));
            }
        }
        Err(e) => spinner.fail(&format!("Initial sync failed: {}", e)),
    }
}

/// Turn debounced watcher batches into index refreshes. The index publishes
/// the resulting events to its subscribers.
fn spawn_index_feeder(
    index: Arc<ThemeFileIndex>,
    mut rx: mpsc::Receiver<FileChange>,
    window: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let batch: Vec<PathBuf> = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = watcher::next_batch(&mut rx, window) => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            for path in batch {
                match index.refresh_path(&path).await {
                    Ok(events) => {
                        for event in events {
                            tracing::debug!(key = %event.key, kind = ?event.kind, "file changed");
                        }
                    }
                    Err(e) => ui::warning(&format!("Failed to read {}: {}", path.display(), e)),
                }
            }
        }
    })
}

/// Open the server URL in the default browser.
fn open_browser(url: &str) {
    use std::process::Command;

    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };

    match result {
        Ok(_) => ui::info(&format!("Opened browser at {}", url)),
        Err(e) => ui::warning(&format!("Failed to open browser: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use themesync_core::testing::{ApiCall, FakeThemeApi};
    use themesync_core::{FileEvent, FileEventKind, ThemeRole};

    fn theme() -> Theme {
        Theme {
            id: 4,
            name: "dev".into(),
            role: ThemeRole::Development,
            processing: false,
        }
    }

    fn theme_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sections")).unwrap();
        fs::write(dir.path().join("sections/hero.liquid"), "<h1>hero</h1>").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_reconcile_uploads_without_deleting() {
        let dir = theme_dir();
        let index = ThemeFileIndex::mount(dir.path(), IgnoreMatcher::default()).unwrap();
        let api = Arc::new(FakeThemeApi::new().with_theme(theme()));
        api.put("snippets/remote-only.liquid", "keep me");

        reconcile(api.clone(), &theme(), &index, 2).await;

        assert!(api.stored("sections/hero.liquid").is_some());
        assert!(api.stored("snippets/remote-only.liquid").is_some());
        assert!(!api
            .calls()
            .iter()
            .any(|call| matches!(call, ApiCall::Delete(_))));
    }

    #[tokio::test]
    async fn test_index_feeder_refreshes_changed_paths() {
        let dir = theme_dir();
        let index =
            Arc::new(ThemeFileIndex::mount(dir.path(), IgnoreMatcher::default()).unwrap());
        let mut events = index.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let feeder =
            spawn_index_feeder(index.clone(), rx, Duration::from_millis(10), cancel.clone());

        let path = index.root().join("sections/hero.liquid");
        fs::write(&path, "<h1>changed</h1>").unwrap();
        tx.send(FileChange::Modified(path.clone())).await.unwrap();
        tx.send(FileChange::Modified(path)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            FileEvent::new(FileEventKind::Modified, "sections/hero.liquid")
        );

        cancel.cancel();
        feeder.await.unwrap();
    }
}
