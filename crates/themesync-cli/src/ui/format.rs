//! Formatting for sizes, durations and the push summary.

use console::Term;
use owo_colors::OwoColorize;
use std::time::Duration;
use themesync_core::{Operation, SyncResult};

pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", size as u64, UNITS[unit])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

pub fn print_sync_summary(result: &SyncResult, bytes: u64, elapsed: Duration) {
    let width = (Term::stderr().size().1 as usize).min(80);

    eprintln!("\n{}", "Push Summary".bold().underline());
    eprintln!("{}", "─".repeat(width));

    for failure in &result.failed {
        let verb = match failure.operation {
            Operation::Upload => "upload",
            Operation::Delete => "delete",
        };
        eprintln!(
            "  {} {} {} {}",
            "✗".red(),
            failure.key.bright_white().bold(),
            format!("({verb})").dimmed(),
            failure.error.red()
        );
    }
    if let Some(reason) = &result.publish_skipped {
        eprintln!("  {} publish skipped: {}", "⚠".yellow(), reason);
    }

    eprintln!("{}", "─".repeat(width));
    eprintln!(
        "  {} {} succeeded, {} failed, {} in {}",
        "Total:".bold(),
        result.succeeded.len().to_string().green(),
        if result.failed.is_empty() {
            result.failed.len().to_string().green().to_string()
        } else {
            result.failed.len().to_string().red().to_string()
        },
        format_size(bytes),
        format_duration(elapsed)
    );
    if result.published {
        eprintln!("  {} theme published", "✓".green());
    }
}
