//! Filesystem watcher feeding the theme index.
//!
//! Raw notify events are forwarded unfiltered except for hidden paths and
//! paths outside the root. Bursts are coalesced on the async side by
//! [`next_batch`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{CliError, Result};

/// Raw filesystem change for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Modified(p) | FileChange::Created(p) | FileChange::Removed(p) => p,
        }
    }
}

/// Recursive watcher over a theme root. Dropping it stops watching.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
    debounce: Duration,
}

impl FileWatcher {
    /// Watch `root` recursively.
    ///
    /// The returned receiver yields one [`FileChange`] per affected path.
    pub fn new(root: PathBuf, debounce_ms: u64) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        if !root.exists() {
            return Err(CliError::FileNotFound(root));
        }
        // Events carry canonical paths on most platforms.
        let root = root.canonicalize()?;

        let (tx, rx) = mpsc::channel(256);
        let root_clone = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "file watcher error");
                    return;
                }
            };
            for path in &event.paths {
                if Self::should_ignore(path, &root_clone) {
                    continue;
                }
                let change = match event.kind {
                    notify::EventKind::Create(_) => FileChange::Created(path.clone()),
                    notify::EventKind::Modify(_) => FileChange::Modified(path.clone()),
                    notify::EventKind::Remove(_) => FileChange::Removed(path.clone()),
                    _ => continue,
                };
                // Receiver gone means the dev server is shutting down.
                let _ = tx.blocking_send(change);
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        tracing::debug!(root = %root.display(), "watching");

        Ok((
            Self {
                _watcher: watcher,
                root,
                debounce: Duration::from_millis(debounce_ms),
            },
            rx,
        ))
    }

    /// Paths outside `root` and hidden files or directories are ignored.
    pub fn should_ignore(path: &Path, root: &Path) -> bool {
        let Ok(rel_path) = path.strip_prefix(root) else {
            return true;
        };

        rel_path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

/// Wait for the next change, then collect everything that arrives until
/// `window` passes without a new event. Paths are deduplicated.
///
/// Returns `None` once the watcher is gone.
pub async fn next_batch(
    rx: &mut mpsc::Receiver<FileChange>,
    window: Duration,
) -> Option<Vec<PathBuf>> {
    let first = rx.recv().await?;
    let mut paths = BTreeSet::new();
    paths.insert(first.path().to_path_buf());

    loop {
        match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(change)) => {
                paths.insert(change.path().to_path_buf());
            }
            // Closed mid-burst: hand out what we have.
            Ok(None) | Err(_) => break,
        }
    }

    Some(paths.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore_hidden_paths() {
        let root = PathBuf::from("/theme");
        assert!(FileWatcher::should_ignore(Path::new("/theme/.git/config"), &root));
        assert!(FileWatcher::should_ignore(Path::new("/theme/.shopifyignore"), &root));
        assert!(FileWatcher::should_ignore(
            Path::new("/theme/sections/.hero.liquid.swp"),
            &root
        ));
        assert!(!FileWatcher::should_ignore(
            Path::new("/theme/sections/hero.liquid"),
            &root
        ));
    }

    #[test]
    fn test_should_ignore_outside_root() {
        let root = PathBuf::from("/theme");
        assert!(FileWatcher::should_ignore(Path::new("/other/file.liquid"), &root));
    }

    #[test]
    fn test_file_change_path() {
        let path = PathBuf::from("/theme/assets/base.css");
        assert_eq!(FileChange::Modified(path.clone()).path(), path.as_path());
        assert_eq!(FileChange::Created(path.clone()).path(), path.as_path());
        assert_eq!(FileChange::Removed(path.clone()).path(), path.as_path());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_batch_coalesces_burst() {
        let (tx, mut rx) = mpsc::channel(16);
        let hero = PathBuf::from("/theme/sections/hero.liquid");
        let css = PathBuf::from("/theme/assets/base.css");

        tx.send(FileChange::Modified(hero.clone())).await.unwrap();
        tx.send(FileChange::Modified(hero.clone())).await.unwrap();
        tx.send(FileChange::Created(css.clone())).await.unwrap();

        let batch = next_batch(&mut rx, Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch, vec![css, hero]);

        drop(tx);
        assert!(next_batch(&mut rx, Duration::from_millis(100)).await.is_none());
    }

    #[test]
    fn test_new_rejects_missing_root() {
        let result = FileWatcher::new(PathBuf::from("/definitely/not/here"), 50);
        assert!(matches!(result, Err(CliError::FileNotFound(_))));
    }
}
