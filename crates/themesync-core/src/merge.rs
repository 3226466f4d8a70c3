//! Three-way merge of files made of environment blocks.
//!
//! A governed file mixes shared text with blocks that belong to one deployment
//! environment each:
//!
//! ```text
//! {
//!   "current": "Default",
//!   /* @env staging */
//!   "api_url": "https://staging.example.com",
//!   /* @endenv */
//!   /* @env production */
//!   "api_url": "https://example.com",
//!   /* @endenv */
//! }
//! ```
//!
//! Blocks are merged independently by environment name, so edits to different
//! environments never conflict. The text outside blocks (the skeleton) is
//! merged as a single unit.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SyncError};

pub const DEFAULT_MARKER_SIZE: usize = 7;

static BLOCK_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:/\*|//|#)\s*@env\s+([A-Za-z0-9_.\-]+)\s*(?:\*/)?\s*$").unwrap()
});
static BLOCK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:/\*|//|#)\s*@endenv\s*(?:\*/)?\s*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    /// Full block text, marker lines included.
    Block { name: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Document {
    segments: Vec<Segment>,
}

impl Document {
    fn parse(source: &str, side: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut open: Option<(String, String, usize)> = None;
        let mut names = HashSet::new();

        for (idx, line) in source.split_inclusive('\n').enumerate() {
            let line_no = idx + 1;
            if let Some(caps) = BLOCK_START.captures(line) {
                if let Some((name, _, start)) = &open {
                    return Err(SyncError::Merge(format!(
                        "{side}: block '{}' at line {line_no} is nested inside '{name}' opened at line {start}",
                        &caps[1]
                    )));
                }
                let name = caps[1].to_string();
                if !names.insert(name.clone()) {
                    return Err(SyncError::Merge(format!(
                        "{side}: block '{name}' appears twice (line {line_no})"
                    )));
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                open = Some((name, line.to_string(), line_no));
            } else if BLOCK_END.is_match(line) {
                let Some((name, mut body, _)) = open.take() else {
                    return Err(SyncError::Merge(format!(
                        "{side}: end marker at line {line_no} has no matching start"
                    )));
                };
                body.push_str(line);
                segments.push(Segment::Block { name, text: body });
            } else if let Some((_, body, _)) = open.as_mut() {
                body.push_str(line);
            } else {
                text.push_str(line);
            }
        }

        if let Some((name, _, start)) = open {
            return Err(SyncError::Merge(format!(
                "{side}: block '{name}' opened at line {start} is never closed"
            )));
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self { segments })
    }

    /// Everything outside blocks.
    fn skeleton(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                Segment::Block { .. } => None,
            })
            .collect()
    }

    fn block(&self, name: &str) -> Option<&str> {
        self.segments.iter().find_map(|s| match s {
            Segment::Block { name: n, text } if n == name => Some(text.as_str()),
            _ => None,
        })
    }

    fn block_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Block { name, .. } => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }
}

/// Standard three-way choice. `None` means both sides changed differently.
fn pick<'a, T: PartialEq>(base: &'a T, current: &'a T, incoming: &'a T) -> Option<&'a T> {
    if current == incoming || incoming == base {
        Some(current)
    } else if current == base {
        Some(incoming)
    } else {
        None
    }
}

/// Merged text plus the names of blocks that conflicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub content: String,
    /// Names of conflicting blocks; `"*"` when the shared text conflicted.
    pub conflicts: Vec<String>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

pub const WHOLE_FILE: &str = "*";

/// Merge three versions of a file.
pub fn merge(base: &str, current: &str, incoming: &str, marker_size: usize) -> Result<MergeOutcome> {
    if marker_size == 0 {
        return Err(SyncError::Merge("marker size must be at least 1".into()));
    }
    let base_doc = Document::parse(base, "base")?;
    let current_doc = Document::parse(current, "current")?;
    let incoming_doc = Document::parse(incoming, "incoming")?;

    let skeletons = (
        base_doc.skeleton(),
        current_doc.skeleton(),
        incoming_doc.skeleton(),
    );
    let Some(skeleton) = pick(&skeletons.0, &skeletons.1, &skeletons.2) else {
        return Ok(MergeOutcome {
            content: conflict_region(current, incoming, marker_size),
            conflicts: vec![WHOLE_FILE.to_string()],
        });
    };
    let (layout, other) = if *skeleton == skeletons.1 {
        (&current_doc, &incoming_doc)
    } else {
        (&incoming_doc, &current_doc)
    };

    let mut conflicts = Vec::new();
    let mut resolve = |name: &str| -> Option<String> {
        let b = base_doc.block(name);
        let c = current_doc.block(name);
        let i = incoming_doc.block(name);
        match pick(&b, &c, &i) {
            Some(chosen) => chosen.map(str::to_string),
            None => {
                conflicts.push(name.to_string());
                Some(conflict_region(
                    c.unwrap_or_default(),
                    i.unwrap_or_default(),
                    marker_size,
                ))
            }
        }
    };

    let in_layout: HashSet<&str> = layout.block_names().collect();
    let mut extra_names: Vec<&str> = Vec::new();
    for name in other.block_names().chain(base_doc.block_names()) {
        if !in_layout.contains(name) && !extra_names.contains(&name) {
            extra_names.push(name);
        }
    }
    let mut extras = String::new();
    for name in extra_names {
        if let Some(text) = resolve(name) {
            extras.push_str(&text);
        }
    }

    let last_block = layout
        .segments
        .iter()
        .rposition(|s| matches!(s, Segment::Block { .. }));
    let mut content = String::with_capacity(current.len().max(incoming.len()));
    for (idx, segment) in layout.segments.iter().enumerate() {
        match segment {
            Segment::Text(text) => content.push_str(text),
            Segment::Block { name, .. } => {
                if let Some(text) = resolve(name) {
                    content.push_str(&text);
                }
            }
        }
        if Some(idx) == last_block {
            content.push_str(&extras);
        }
    }
    if last_block.is_none() {
        content.push_str(&extras);
    }

    Ok(MergeOutcome { content, conflicts })
}

fn conflict_region(current: &str, incoming: &str, marker_size: usize) -> String {
    let mut out = String::new();
    out.push_str(&"<".repeat(marker_size));
    out.push_str(" current\n");
    push_line_terminated(&mut out, current);
    out.push_str(&"=".repeat(marker_size));
    out.push('\n');
    push_line_terminated(&mut out, incoming);
    out.push_str(&">".repeat(marker_size));
    out.push_str(" incoming\n");
    out
}

fn push_line_terminated(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

/// Result of a driver run, mapped to git's exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    Clean,
    Conflicted(Vec<String>),
}

impl MergeStatus {
    /// Exit status understood by version control merge drivers.
    pub fn exit_code(&self) -> i32 {
        match self {
            MergeStatus::Clean => 0,
            MergeStatus::Conflicted(_) => 1,
        }
    }
}

/// Merge driver entry point: reads the three versions and writes the result
/// over `current`.
pub fn run_driver(
    base: &Path,
    current: &Path,
    incoming: &Path,
    marker_size: usize,
) -> Result<MergeStatus> {
    let read = |path: &Path| {
        std::fs::read_to_string(path)
            .map_err(|e| SyncError::Merge(format!("cannot read {}: {e}", path.display())))
    };
    let outcome = merge(&read(base)?, &read(current)?, &read(incoming)?, marker_size)?;
    std::fs::write(current, &outcome.content)
        .map_err(|e| SyncError::Merge(format!("cannot write {}: {e}", current.display())))?;

    if outcome.is_clean() {
        tracing::debug!(file = %current.display(), "environment blocks merged cleanly");
        Ok(MergeStatus::Clean)
    } else {
        tracing::debug!(file = %current.display(), conflicts = ?outcome.conflicts, "merge conflicts");
        Ok(MergeStatus::Conflicted(outcome.conflicts))
    }
}
