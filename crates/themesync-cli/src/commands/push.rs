//! `themesync push`: make the remote theme match the local directory.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use themesync_core::{
    plan, AdminClient, PlanOptions, SyncOptions, SyncResult, Theme, ThemeApi, ThemeFileIndex,
    Uploader,
};

use crate::cli::PushArgs;
use crate::commands::utils;
use crate::config::ThemesyncConfig;
use crate::error::{CliError, Result};
use crate::ui::{self, SyncProgress};

/// Machine-readable result printed with `--json`.
#[derive(Debug, Serialize)]
pub struct PushReport {
    pub theme_id: u64,
    pub theme_name: String,
    #[serde(flatten)]
    pub result: SyncResult,
}

/// Upload the local theme to its remote theme.
///
/// Steps:
/// 1. Load configuration and resolve (or create) the target theme
/// 2. Mount the local index and fetch remote checksums
/// 3. Plan uploads and deletes, honoring `--nodelete`
/// 4. Apply the plan with per-file progress
/// 5. Print the summary, or JSON with `--json`
///
/// # Arguments
///
/// * `args` - Parsed command-line arguments
///
/// # Errors
///
/// Returns errors for:
/// - Invalid configuration or credentials
/// - A theme that never finishes processing
/// - Any file that failed to upload or delete ([`CliError::PartialSync`])
pub async fn execute(args: PushArgs) -> Result<()> {
    let config = utils::load_config(&args.theme, args.overrides())?;
    let session = utils::build_session(&config)?;
    let api: Arc<dyn ThemeApi> = Arc::new(AdminClient::new(session)?);

    let report = run(&args, &config, api).await?;
    let result = &report.result;
    if result.failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::PartialSync {
            failed: result.failed.len(),
            total: result.failed.len() + result.succeeded.len(),
        })
    }
}

/// Resolve the theme, diff and apply. Per-file failures are part of the
/// report, not an error.
pub async fn run(
    args: &PushArgs,
    config: &ThemesyncConfig,
    api: Arc<dyn ThemeApi>,
) -> Result<PushReport> {
    let target = utils::push_target(config, args.unpublished)?;
    let theme = utils::resolve_theme(api.as_ref(), target).await?;

    let matcher = utils::theme_matcher(config);
    let index = ThemeFileIndex::mount(&config.path, matcher.clone())?;
    let remote = api.fetch_checksums(theme.id).await?.filtered(&matcher);
    let plan = plan(
        &index.checksums(),
        &remote,
        &PlanOptions {
            no_delete: config.nodelete,
        },
    );
    tracing::debug!(
        upload = plan.to_upload.len(),
        delete = plan.to_delete.len(),
        unchanged = plan.unchanged.len(),
        "sync plan"
    );

    if plan.is_empty() && !args.publish {
        if !args.json {
            ui::success(&format!("Theme '{}' is already up to date", theme.name));
        }
        return report(&theme, SyncResult::default(), args.json);
    }

    if !args.json {
        ui::info(&format!(
            "Pushing to '{}' (#{}): {} to upload, {} to delete",
            theme.name,
            theme.id,
            plan.to_upload.len(),
            plan.to_delete.len()
        ));
    }

    let progress = Arc::new(SyncProgress::new(
        (plan.to_upload.len() + plan.to_delete.len()) as u64,
    ));
    let on_progress = {
        let progress = progress.clone();
        Arc::new(move |key: &str, ok: bool| progress.file_done(key, ok))
    };

    let started = Instant::now();
    let result = Uploader::new(api, theme.id)
        .with_options(SyncOptions {
            concurrency: config.concurrency,
            publish: args.publish,
        })
        .on_progress(on_progress)
        .apply(&plan, &index)
        .await?;
    progress.finish();

    if !args.json {
        let bytes: u64 = result
            .succeeded
            .iter()
            .filter_map(|key| index.read(key))
            .map(|asset| asset.size)
            .sum();
        ui::print_sync_summary(&result, bytes, started.elapsed());
    }

    report(&theme, result, args.json)
}

fn report(theme: &Theme, result: SyncResult, json: bool) -> Result<PushReport> {
    let report = PushReport {
        theme_id: theme.id,
        theme_name: theme.name.clone(),
        result,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report)
}
