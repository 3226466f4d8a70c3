//! Conversion of CLI errors into miette reports.

use crate::error::{CliError, ConfigError};
use miette::Report;
use themesync_core::SyncError;

/// Render a [`CliError`] for the terminal, moving hints into miette's help.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Config(e) => config_error_to_miette(e),
        CliError::Sync(e) => sync_error_to_miette(e),
        _ => miette::miette!("{}", err),
    }
}

fn config_error_to_miette(err: ConfigError) -> Report {
    match err {
        ConfigError::MissingField { field, hint } => {
            miette::miette!(help = hint, "Missing required configuration: {}", field)
        }
        ConfigError::InvalidValue { field, value, hint } => {
            miette::miette!(help = hint, "Invalid value for '{}': {}", field, value)
        }
        _ => miette::miette!("{}", err),
    }
}

pub fn sync_error_to_miette(err: SyncError) -> Report {
    match err {
        SyncError::ThemeNotReady {
            theme_id,
            reason,
            hint,
        } => miette::miette!(help = hint, "Theme {} is not ready: {}", theme_id, reason),
        SyncError::Remote {
            operation,
            status,
            message,
        } if status == 401 || status == 403 => miette::miette!(
            help = "Check the store name and the password or access token",
            "Remote refused {} ({}): {}",
            operation,
            status,
            message
        ),
        _ => miette::miette!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_carries_help() {
        let report = cli_error_to_miette(
            ConfigError::MissingField {
                field: "store".into(),
                hint: "Pass --store".into(),
            }
            .into(),
        );
        let help = report.help().map(|h| h.to_string());
        assert_eq!(help.as_deref(), Some("Pass --store"));
        assert!(report.to_string().contains("store"));
    }

    #[test]
    fn test_auth_failure_gets_help() {
        let report = sync_error_to_miette(SyncError::remote("fetch theme", 401, "Unauthorized"));
        assert!(report.help().is_some());
        assert!(report.to_string().contains("401"));
    }

    #[test]
    fn test_other_errors_keep_message() {
        let report = cli_error_to_miette(CliError::Server("bind failed".into()));
        assert_eq!(report.to_string(), "Preview server failed: bind failed");
    }
}
