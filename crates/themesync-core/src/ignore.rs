//! Ignore and `only` filtering for theme keys.
//!
//! Patterns come from three places: the built-in defaults, the theme's
//! `.shopifyignore` file and the `--ignore`/`--only` options. A pattern written
//! as `/expr/` is a regular expression, anything else is a glob in which `*`
//! also crosses directory separators, so `templates/*.json` covers nested
//! templates too.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::error::{Result, SyncError};

pub const IGNORE_FILE: &str = ".shopifyignore";

pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/.git",
    "**/.vscode",
    "**/.hg",
    "**/.bzr",
    "**/.svn",
    "**/_darcs",
    "**/CVS",
    "**/*.sublime-{project,workspace}",
    "**/.DS_Store",
    "**/.sass-cache",
    "**/Thumbs.db",
    "**/desktop.ini",
    "**/config.yml",
    "**/node_modules/",
    ".prettierrc.json",
];

#[derive(Debug, Clone)]
enum Pattern {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Pattern {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.len() > 2 && raw.starts_with('/') && raw.ends_with('/') {
            let expr = &raw[1..raw.len() - 1];
            return Regex::new(expr)
                .map(Pattern::Regex)
                .map_err(|e| SyncError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                });
        }

        let glob = raw.trim_start_matches("./").trim_end_matches('/');
        GlobBuilder::new(glob)
            .literal_separator(false)
            .build()
            .map(|g| Pattern::Glob(g.compile_matcher()))
            .map_err(|e| SyncError::InvalidPattern {
                pattern: raw.to_string(),
                reason: e.to_string(),
            })
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Pattern::Regex(re) => re.is_match(key),
            Pattern::Glob(glob) => {
                glob.is_match(key) || ancestors(key).any(|dir| glob.is_match(dir))
            }
        }
    }
}

/// `a/b/c.txt` yields `a` and `a/b`.
fn ancestors(key: &str) -> impl Iterator<Item = &str> {
    key.match_indices('/').map(move |(idx, _)| &key[..idx])
}

/// Which theme keys the engine leaves alone. An `only` list, when present,
/// wins over ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    ignore: Vec<Pattern>,
    only: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Build a matcher from raw patterns. Invalid patterns are logged and skipped.
    pub fn new<I, O, S, T>(ignore: I, only: O) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            ignore: compile_lenient(ignore),
            only: compile_lenient(only),
        }
    }

    /// Defaults plus the theme's ignore file plus extra patterns.
    pub fn for_theme(root: &Path, extra_ignore: &[String], only: &[String]) -> Self {
        let from_file = read_ignore_file(root);
        let patterns = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(from_file)
            .chain(extra_ignore.iter().cloned());
        Self::new(patterns, only)
    }

    /// Check every pattern compiles, reporting the first that does not.
    pub fn validate(patterns: &[String]) -> Result<()> {
        patterns.iter().try_for_each(|p| Pattern::parse(p).map(|_| ()))
    }

    /// Whether `key` is excluded from sync and preview.
    pub fn is_ignored(&self, key: &str) -> bool {
        if key.split('/').any(|part| part.starts_with('.')) {
            return true;
        }
        if self.ignore.iter().any(|p| p.matches(key)) {
            return true;
        }
        !self.only.is_empty() && !self.only.iter().any(|p| p.matches(key))
    }
}

fn compile_lenient<I, S>(patterns: I) -> Vec<Pattern>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .filter_map(|raw| match Pattern::parse(raw.as_ref()) {
            Ok(p) => Some(p),
            Err(err) => {
                tracing::warn!("skipping {err}");
                None
            }
        })
        .collect()
}

/// Patterns from `<root>/.shopifyignore`, without comments and blank lines.
pub fn read_ignore_file(root: &Path) -> Vec<String> {
    let path = root.join(IGNORE_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => parse_ignore_file(&content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot read ignore file");
            Vec::new()
        }
    }
}

/// Patterns from an ignore file, skipping blanks and `#` comments.
pub fn parse_ignore_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
