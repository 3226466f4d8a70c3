//! Shared steps for commands that talk to a store.
//!
//! - Configuration loading and validation
//! - Session construction
//! - Picking, creating and waiting for the target theme

use std::path::Path;

use themesync_core::{IgnoreMatcher, ReadinessGate, Session, Theme, ThemeApi, ThemeRole};
use tokio::time::Instant;

use crate::cli::ThemeArgs;
use crate::config::{ConfigOverrides, ThemesyncConfig};
use crate::error::{ConfigError, Result};
use crate::ui::Spinner;

/// Name of the theme `dev` creates when none is given.
pub const DEVELOPMENT_THEME_NAME: &str = "themesync-development";

/// Load configuration from the current directory and validate it.
pub fn load_config(args: &ThemeArgs, overrides: ConfigOverrides) -> Result<ThemesyncConfig> {
    let cwd = std::env::current_dir()?;
    load_config_in(&cwd, args, overrides)
}

pub fn load_config_in(
    cwd: &Path,
    args: &ThemeArgs,
    overrides: ConfigOverrides,
) -> Result<ThemesyncConfig> {
    let config = ThemesyncConfig::load(
        cwd,
        args.config.as_deref(),
        args.environment.as_deref(),
        &overrides,
    )?;
    config.validate()?;
    tracing::debug!(
        store = config.store.as_deref().unwrap_or_default(),
        path = %config.path.display(),
        "configuration loaded"
    );
    Ok(config)
}

/// Session for a validated configuration.
pub fn build_session(config: &ThemesyncConfig) -> Result<Session> {
    let store = config.store.clone().ok_or_else(|| ConfigError::MissingField {
        field: "store".to_string(),
        hint: "Pass --store <name> or set store in themesync.toml".to_string(),
    })?;
    let password = config.password.clone().ok_or_else(|| ConfigError::MissingField {
        field: "password".to_string(),
        hint: "Pass --password or set THEMESYNC_PASSWORD".to_string(),
    })?;
    Ok(Session::new(store, password).with_storefront_token(config.storefront_token.clone()))
}

/// Ignore rules for the configured theme root, `--ignore` and `--only`.
pub fn theme_matcher(config: &ThemesyncConfig) -> IgnoreMatcher {
    IgnoreMatcher::for_theme(&config.path, &config.ignore, &config.only)
}

/// Which theme a command works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeTarget {
    Existing(u64),
    Create { name: String, role: ThemeRole },
}

/// `push` needs an existing theme id, unless `--unpublished` asks for a new
/// theme (named by `theme` when given).
pub fn push_target(config: &ThemesyncConfig, unpublished: bool) -> Result<ThemeTarget> {
    if unpublished {
        let name = config
            .theme
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(timestamped_name);
        return Ok(ThemeTarget::Create {
            name,
            role: ThemeRole::Unpublished,
        });
    }

    match (&config.theme, config.theme_id()) {
        (_, Some(id)) => Ok(ThemeTarget::Existing(id)),
        (Some(name), None) => Err(ConfigError::InvalidValue {
            field: "theme".to_string(),
            value: name.clone(),
            hint: "Use a numeric theme id, or add --unpublished to create a theme with this name"
                .to_string(),
        }
        .into()),
        (None, None) => Err(ConfigError::MissingField {
            field: "theme".to_string(),
            hint: "Pass --theme <id>, or --unpublished to create a new theme".to_string(),
        }
        .into()),
    }
}

/// `dev` previews an existing theme by id, otherwise a development theme.
pub fn dev_target(config: &ThemesyncConfig) -> ThemeTarget {
    match config.theme_id() {
        Some(id) => ThemeTarget::Existing(id),
        None => ThemeTarget::Create {
            name: config
                .theme
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEVELOPMENT_THEME_NAME.to_string()),
            role: ThemeRole::Development,
        },
    }
}

fn timestamped_name() -> String {
    format!("themesync-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

/// Create the theme if needed, then wait until the remote finished preparing it.
pub async fn resolve_theme(api: &dyn ThemeApi, target: ThemeTarget) -> Result<Theme> {
    let theme_id = match target {
        ThemeTarget::Existing(id) => id,
        ThemeTarget::Create { name, role } => {
            let theme = api.create_theme(&name, role).await?;
            crate::ui::info(&format!(
                "Created {} theme '{}' (#{})",
                role.as_remote(),
                theme.name,
                theme.id
            ));
            theme.id
        }
    };

    let spinner = Spinner::new(&format!("Waiting for theme #{theme_id}"));
    match ReadinessGate::default()
        .await_ready(api, theme_id, Instant::now())
        .await
    {
        Ok(theme) => {
            spinner.finish(&format!("Theme '{}' (#{}) is ready", theme.name, theme.id));
            Ok(theme)
        }
        Err(err) => {
            spinner.fail(&format!("Theme #{theme_id} is not available"));
            Err(err.into())
        }
    }
}
