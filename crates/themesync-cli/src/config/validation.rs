use themesync_core::IgnoreMatcher;

use crate::config::ThemesyncConfig;
use crate::error::{ConfigError, Result};

impl ThemesyncConfig {
    /// Check everything both `push` and `dev` need before talking to the remote.
    pub fn validate(&self) -> Result<()> {
        if self.store.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField {
                field: "store".to_string(),
                hint: "Pass --store <name> or set store in themesync.toml".to_string(),
            }
            .into());
        }

        if self.password.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField {
                field: "password".to_string(),
                hint: "Pass --password or set THEMESYNC_PASSWORD".to_string(),
            }
            .into());
        }

        if !self.path.is_dir() {
            return Err(ConfigError::InvalidValue {
                field: "path".to_string(),
                value: self.path.display().to_string(),
                hint: "Theme directory does not exist".to_string(),
            }
            .into());
        }

        if let Some(extension) = &self.extension_path {
            if !extension.is_dir() {
                return Err(ConfigError::InvalidValue {
                    field: "extension_path".to_string(),
                    value: extension.display().to_string(),
                    hint: "Extension directory does not exist".to_string(),
                }
                .into());
            }
        }

        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency".to_string(),
                value: "0".to_string(),
                hint: "Use a value of at least 1".to_string(),
            }
            .into());
        }

        for (field, patterns) in [("ignore", &self.ignore), ("only", &self.only)] {
            IgnoreMatcher::validate(patterns).map_err(|e| ConfigError::InvalidValue {
                field: field.to_string(),
                value: patterns.join(", "),
                hint: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Numeric theme id, if `theme` holds one.
    pub fn theme_id(&self) -> Option<u64> {
        self.theme.as_deref().and_then(|t| t.trim().parse().ok())
    }
}
