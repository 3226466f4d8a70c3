//! Per-file progress for a push.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Bar that advances once per uploaded or deleted file. Failures are printed
/// above the bar as they happen.
pub struct SyncProgress {
    bar: ProgressBar,
}

impl SyncProgress {
    pub fn new(total: u64) -> Self {
        let bar = if Self::should_show() {
            ProgressBar::new(total)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn file_done(&self, key: &str, ok: bool) {
        if ok {
            self.bar.set_message(key.dimmed().to_string());
        } else {
            self.bar.println(format!("  {} {}", "✗".red(), key));
        }
        self.bar.inc(1);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn should_show() -> bool {
        console::user_attended_stderr() && !super::is_ci()
    }
}

impl Drop for SyncProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
