//! Terminal output: status lines, spinners, progress bars and summaries.
//!
//! Everything here writes to stderr so stdout stays free for `--json` output.

mod format;
mod messages;
mod progress;
mod spinner;

pub use format::{format_duration, format_size, print_sync_summary};
pub use messages::{error, info, success, warning};
pub use progress::SyncProgress;
pub use spinner::Spinner;

const CI_MARKERS: &[&str] = &["CI", "GITHUB_ACTIONS", "GITLAB_CI", "CIRCLECI", "BUILDKITE"];

/// Whether we are running under a CI service.
pub fn is_ci() -> bool {
    CI_MARKERS.iter().any(|var| std::env::var_os(var).is_some())
}

/// `NO_COLOR` beats `FORCE_COLOR`, which beats terminal detection.
pub fn should_use_color() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }
    console::user_attended_stderr()
}

/// Apply the color decision to progress bars and spinners.
pub fn init_colors(no_color: bool) {
    let enabled = !no_color && should_use_color();
    console::set_colors_enabled(enabled);
    console::set_colors_enabled_stderr(enabled);
}
