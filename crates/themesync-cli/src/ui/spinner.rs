//! Spinner for steps of unknown length, like waiting on the remote.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Theme creation and checksum fetches can take a while, so the spinner shows
/// elapsed time. In CI it is hidden and only the outcome is printed.
pub struct Spinner {
    bar: ProgressBar,
    attended: bool,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let attended = !super::is_ci();
        let bar = if attended {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template("{spinner:.magenta} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");
        bar.set_style(style);
        bar.set_message(message.to_owned());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar, attended }
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_owned());
    }

    pub fn finish(&self, message: &str) {
        self.conclude(format!("{} {message}", "✓".green()));
    }

    pub fn fail(&self, message: &str) {
        self.conclude(format!("{} {message}", "✗".red()));
    }

    fn conclude(&self, line: String) {
        if self.attended {
            self.bar.finish_and_clear();
        } else {
            self.bar.finish();
        }
        eprintln!("{line}");
    }
}
