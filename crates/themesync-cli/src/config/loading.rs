use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format as _, Serialized, Toml},
    Figment,
};
use serde::Serialize;

use crate::config::ThemesyncConfig;
use crate::error::{ConfigError, Result};

pub const CONFIG_FILE: &str = "themesync.toml";
pub const ENV_PREFIX: &str = "THEMESYNC_";

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storefront_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodelete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_path: Option<PathBuf>,
}

impl ThemesyncConfig {
    /// Load from every source.
    ///
    /// `config_path` names the file explicitly; otherwise `themesync.toml` in
    /// `cwd` is used when present. `environment` selects a table under
    /// `[environments]` that overrides the file's top-level keys.
    pub fn load(
        cwd: &Path,
        config_path: Option<&Path>,
        environment: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = match config_path {
            Some(path) if path.exists() => Some(path.to_path_buf()),
            Some(path) => return Err(ConfigError::NotFound(path.to_path_buf()).into()),
            None => {
                let default_path = cwd.join(CONFIG_FILE);
                default_path.exists().then_some(default_path)
            }
        };

        if let Some(path) = &config_file {
            tracing::debug!(path = %path.display(), "loading config file");
            let file = Figment::from(Toml::file(path));
            figment = figment.merge(file.clone());

            if let Some(name) = environment {
                let key = format!("environments.{name}");
                if file.find_value(&key).is_err() {
                    return Err(ConfigError::EnvironmentNotFound(name.to_string()).into());
                }
                figment = figment.merge(file.focus(&key));
            }
        } else if let Some(name) = environment {
            return Err(ConfigError::EnvironmentNotFound(name.to_string()).into());
        }

        // THEMESYNC_STORE, THEMESYNC_STOREFRONT_TOKEN, ...
        figment = figment.merge(Env::prefixed(ENV_PREFIX));
        figment = figment.merge(Serialized::defaults(overrides));

        let mut config: Self = figment.extract().map_err(|e| {
            let field = if e.path.is_empty() {
                "configuration".to_string()
            } else {
                e.path.join(".")
            };
            ConfigError::InvalidValue {
                field,
                value: e.kind.to_string(),
                hint: format!("Check {CONFIG_FILE} syntax and field types"),
            }
        })?;

        config.path = absolutize(cwd, &config.path);
        config.extension_path = config.extension_path.map(|p| absolutize(cwd, &p));
        Ok(config)
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
