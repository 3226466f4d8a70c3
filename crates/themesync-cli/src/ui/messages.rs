//! One-line status messages, all on stderr.

use owo_colors::OwoColorize;

pub fn success(message: &str) {
    eprintln!("{} {message}", "✓".green().bold());
}

pub fn info(message: &str) {
    eprintln!("{} {message}", "•".cyan());
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "!".yellow().bold(), message.yellow());
}

pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.bold());
}
