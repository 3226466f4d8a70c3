//! In-memory index of a theme directory on disk.
//!
//! The index is filled by one synchronous scan at mount time and kept current
//! by feeding it paths reported by a filesystem watcher. Every effective change
//! is published on a broadcast channel.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use walkdir::WalkDir;

use crate::checksum::{checksum_content, is_text_file};
use crate::error::{Result, SyncError};
use crate::ignore::IgnoreMatcher;
use crate::key_locks::KeyLocks;
use crate::types::{Asset, AssetContent, ChecksumManifest};

/// Top-level directories that make up a theme.
pub const THEME_DIRECTORIES: &[&str] = &[
    "assets",
    "blocks",
    "config",
    "layout",
    "locales",
    "sections",
    "snippets",
    "templates",
];

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Added,
    Modified,
    Removed,
}

/// An effective change to one indexed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub key: String,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// On-disk metadata, read fresh rather than from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

pub fn is_theme_key(key: &str) -> bool {
    match key.split_once('/') {
        Some((dir, rest)) => THEME_DIRECTORIES.contains(&dir) && !rest.is_empty(),
        None => false,
    }
}

/// Theme files held in memory, keyed by their path relative to the root.
///
/// Reads never touch the disk; [`ThemeFileIndex::refresh`] and
/// [`ThemeFileIndex::refresh_path`] pull changes in and publish them to
/// subscribers.
pub struct ThemeFileIndex {
    root: PathBuf,
    matcher: IgnoreMatcher,
    files: RwLock<BTreeMap<String, Arc<Asset>>>,
    key_locks: KeyLocks,
    events: broadcast::Sender<FileEvent>,
}

impl std::fmt::Debug for ThemeFileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeFileIndex")
            .field("root", &self.root)
            .field("files", &self.files.read().len())
            .finish()
    }
}

impl ThemeFileIndex {
    /// Scan `root` and return a fully populated index.
    pub fn mount(root: impl AsRef<Path>, matcher: IgnoreMatcher) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(SyncError::RootNotFound(root.to_path_buf()));
        }
        let root = root.canonicalize()?;

        let mut files = BTreeMap::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = relative_key(&root, entry.path()) else {
                continue;
            };
            if !is_theme_key(&key) || matcher.is_ignored(&key) {
                continue;
            }
            match load_asset_sync(&root, &key) {
                Ok(asset) => {
                    files.insert(key, Arc::new(asset));
                }
                Err(err) => tracing::warn!(key, error = %err, "skipping unreadable file"),
            }
        }

        tracing::debug!(root = %root.display(), files = files.len(), "theme mounted");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            root,
            matcher,
            files: RwLock::new(files),
            key_locks: KeyLocks::new(),
            events,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn matcher(&self) -> &IgnoreMatcher {
        &self.matcher
    }

    pub fn list(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    pub fn read(&self, key: &str) -> Option<Arc<Asset>> {
        self.files.read().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.files.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Checksums of every indexed key.
    pub fn checksums(&self) -> ChecksumManifest {
        self.files
            .read()
            .iter()
            .map(|(key, asset)| (key.clone(), asset.checksum.clone()))
            .collect()
    }

    /// Receive every later change. Slow receivers see `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<FileEvent> {
        self.events.subscribe()
    }

    /// Size and modification time straight from disk, for indexed keys only.
    pub async fn stat(&self, key: &str) -> Result<Option<FileStat>> {
        if !self.has(key) {
            return Ok(None);
        }
        match tokio::fs::metadata(self.root.join(key)).await {
            Ok(meta) => Ok(Some(FileStat {
                size: meta.len(),
                modified: meta.modified().ok(),
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Theme key for an absolute path, if the path belongs to the theme.
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let key = relative_key(&self.root, path)?;
        (is_theme_key(&key) && !self.matcher.is_ignored(&key)).then_some(key)
    }

    /// Re-read whatever sits at `path` and publish the resulting events.
    pub async fn refresh_path(&self, path: &Path) -> Result<Vec<FileEvent>> {
        let Some(key) = relative_key(&self.root, path) else {
            return Ok(Vec::new());
        };

        if self.key_for(path).is_some() {
            if let Some(event) = self.refresh(&key).await? {
                return Ok(vec![event]);
            }
        }

        // A removed directory takes its indexed children with it.
        if tokio::fs::metadata(path).await.is_err() {
            let prefix = format!("{key}/");
            let children: Vec<String> = self
                .files
                .read()
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            let mut events = Vec::with_capacity(children.len());
            for child in children {
                if let Some(event) = self.refresh(&child).await? {
                    events.push(event);
                }
            }
            return Ok(events);
        }

        Ok(Vec::new())
    }

    /// Reload one key from disk. Calls for the same key never overlap, so a
    /// later change cannot be overwritten by an earlier in-flight read.
    pub async fn refresh(&self, key: &str) -> Result<Option<FileEvent>> {
        self.key_locks.serialize(key, self.reload(key)).await
    }

    async fn reload(&self, key: &str) -> Result<Option<FileEvent>> {
        let loaded = load_asset(&self.root, key).await?;
        let event = {
            let mut files = self.files.write();
            match loaded {
                Some(asset) => {
                    let checksum = asset.checksum.clone();
                    match files.insert(key.to_string(), Arc::new(asset)) {
                        None => Some(FileEvent::new(FileEventKind::Added, key)),
                        Some(prev) if prev.checksum != checksum => {
                            Some(FileEvent::new(FileEventKind::Modified, key))
                        }
                        Some(_) => None,
                    }
                }
                None => files
                    .remove(key)
                    .map(|_| FileEvent::new(FileEventKind::Removed, key)),
            }
        };

        if let Some(event) = &event {
            tracing::debug!(key, kind = ?event.kind, "local change");
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }
        Ok(event)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let parts = parts?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn build_asset(key: &str, bytes: Vec<u8>, modified_at: Option<SystemTime>) -> Asset {
    let checksum = checksum_content(key, &bytes);
    let size = bytes.len() as u64;
    let content = if is_text_file(key) {
        AssetContent::from_bytes(bytes)
    } else {
        AssetContent::Binary(bytes)
    };
    Asset {
        key: key.to_string(),
        checksum,
        content,
        size,
        modified_at,
    }
}

fn load_asset_sync(root: &Path, key: &str) -> std::io::Result<Asset> {
    let path = root.join(key);
    let bytes = std::fs::read(&path)?;
    let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
    Ok(build_asset(key, bytes, modified))
}

/// `Ok(None)` when nothing readable as a file exists at the key.
async fn load_asset(root: &Path, key: &str) -> Result<Option<Asset>> {
    let path = root.join(key);
    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(SyncError::ChecksumUnreadable {
                key: key.to_string(),
                reason: err.to_string(),
            })
        }
    };
    if !meta.is_file() {
        return Ok(None);
    }
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(build_asset(key, bytes, meta.modified().ok()))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SyncError::ChecksumUnreadable {
            key: key.to_string(),
            reason: err.to_string(),
        }),
    }
}
