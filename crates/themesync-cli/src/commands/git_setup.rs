//! `themesync git-setup`: route environment-block files through the merge driver.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};

use crate::cli::GitSetupArgs;
use crate::error::{CliError, Result};
use crate::ui;

/// Merge driver name used in `.gitattributes` and `git config`.
pub const DRIVER_NAME: &str = "themesync-env";
const DRIVER_COMMAND: &str = "themesync merge-driver %O %A %B %L";
const DRIVER_DESCRIPTION: &str = "Themesync environment-block merge";
const ATTRIBUTES_HEADER: &str = "# Themesync multi-environment configuration";

/// Files that carry environment blocks.
const GOVERNED_PATTERNS: &[&str] = &[
    "config/settings_data.json",
    "templates/**/*.json",
    "sections/*.json",
    "locales/*.json",
];

/// Register the merge driver for the current repository.
///
/// # Errors
///
/// Returns [`CliError::Git`] when the path is not inside a work tree or git
/// refuses the configuration.
pub fn execute(args: GitSetupArgs) -> Result<()> {
    let root = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    ensure_work_tree(&root).map_err(git_error)?;

    if args.reset {
        reset(&root);
        return Ok(());
    }

    ui::info("Configuring git for multi-environment theme development...");
    if write_attributes(&root)? {
        ui::success("Added merge rules to .gitattributes");
    } else {
        ui::info(".gitattributes already configured for multi-environment themes");
    }

    let driver_key = format!("merge.{DRIVER_NAME}.driver");
    git(&root, &["config", &driver_key, DRIVER_COMMAND]).map_err(git_error)?;
    git(
        &root,
        &["config", &format!("merge.{DRIVER_NAME}.name"), DRIVER_DESCRIPTION],
    )
    .map_err(git_error)?;

    match git(&root, &["config", "--get", &driver_key]) {
        Ok(value) if value.trim() == DRIVER_COMMAND => {}
        Ok(value) => ui::warning(&format!(
            "Git configuration validation failed: {driver_key} is '{}'",
            value.trim()
        )),
        Err(e) => ui::warning(&format!("Git configuration validation failed: {e:#}")),
    }

    ui::success("Git configured for multi-environment theme development");
    Ok(())
}

/// Unset the driver. Failures are reported but not fatal, and `.gitattributes`
/// is left alone.
fn reset(root: &Path) {
    for field in ["driver", "name"] {
        let key = format!("merge.{DRIVER_NAME}.{field}");
        if let Err(e) = git(root, &["config", "--unset", &key]) {
            ui::warning(&format!("Could not unset {key}: {e:#}"));
        }
    }
    ui::success("Git configuration reset");
    ui::warning("Note: .gitattributes content is not removed automatically");
    ui::info(&format!(
        "Remove the '{ATTRIBUTES_HEADER}' section from .gitattributes manually if needed"
    ));
}

/// Append the merge rules to `.gitattributes`. Returns `false` when they are
/// already there.
pub fn write_attributes(root: &Path) -> Result<bool> {
    let path = attributes_path(root);
    let existing = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing.contains(ATTRIBUTES_HEADER) {
        return Ok(false);
    }

    let mut content = existing;
    if !content.is_empty() {
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push('\n');
    }
    content.push_str(&attributes_block());
    fs::write(&path, content)?;
    Ok(true)
}

fn attributes_path(root: &Path) -> PathBuf {
    root.join(".gitattributes")
}

fn attributes_block() -> String {
    let mut block = format!("{ATTRIBUTES_HEADER}\n");
    for pattern in GOVERNED_PATTERNS {
        block.push_str(&format!("{pattern} merge={DRIVER_NAME}\n"));
    }
    block
}

fn ensure_work_tree(root: &Path) -> anyhow::Result<()> {
    let inside = git(root, &["rev-parse", "--is-inside-work-tree"])
        .with_context(|| format!("{} is not a git repository", root.display()))?;
    if inside.trim() != "true" {
        bail!("{} is not inside a git work tree", root.display());
    }
    Ok(())
}

/// Run git in `root` and return its stdout.
fn git(root: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .context("failed to run git")?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    String::from_utf8(output.stdout).context("git printed invalid UTF-8")
}

fn git_error(err: anyhow::Error) -> CliError {
    CliError::Git(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_attributes_creates_file() {
        let dir = TempDir::new().unwrap();
        assert!(write_attributes(dir.path()).unwrap());

        let content = fs::read_to_string(dir.path().join(".gitattributes")).unwrap();
        assert!(content.starts_with(ATTRIBUTES_HEADER));
        assert!(content.contains("config/settings_data.json merge=themesync-env\n"));
        assert!(content.contains("templates/**/*.json merge=themesync-env\n"));
    }

    #[test]
    fn test_write_attributes_appends_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitattributes");
        fs::write(&path, "*.png binary").unwrap();

        assert!(write_attributes(dir.path()).unwrap());
        assert!(!write_attributes(dir.path()).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("*.png binary\n\n# Themesync"));
        assert_eq!(content.matches(ATTRIBUTES_HEADER).count(), 1);
    }

    #[test]
    fn test_outside_repository_is_git_error() {
        let dir = TempDir::new().unwrap();
        let err = execute(GitSetupArgs {
            path: Some(dir.path().to_path_buf()),
            reset: false,
        })
        .unwrap_err();
        assert!(matches!(err, CliError::Git(_)));
        assert!(!dir.path().join(".gitattributes").exists());
    }
}
