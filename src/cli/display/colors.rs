//! Status and priority color mapping for CLI output.
//!
//! All coloring respects `NO_COLOR` env var automatically via the `colored` crate.

use colored::Colorize;

/// Returns a colored string for a node/task status value.
///
/// Color scheme:
/// - Green:  active, running, success
/// - Yellow: pre_run, half_open
/// - Cyan:   finished
/// - Red:    open (circuit), failed
/// - Dim:    disabled, inactive, stale
/// - White:  unknown/default
pub fn colorize_status(status: &str) -> colored::ColoredString {
    match status.to_lowercase().as_str() {
        "active" | "running" | "success" => status.green().bold(),
        "pre_run" | "half_open" => status.yellow(),
        "finished" => status.cyan(),
        "open" | "failed" => status.red().bold(),
        "disabled" | "inactive" | "stale" => status.dimmed(),
        _ => status.white(),
    }
}

/// Returns a colored string for reservation priority values
/// (`HIGH` > `LOW_PREEMPT` > `LOW`, §4.D).
pub fn colorize_priority(priority: &str) -> colored::ColoredString {
    match priority.to_uppercase().as_str() {
        "HIGH" => priority.red().bold(),
        "LOW_PREEMPT" => priority.yellow(),
        "LOW" => priority.dimmed(),
        _ => priority.white(),
    }
}

/// Styled label for detail views (bold + dimmed colon).
pub fn label(name: &str) -> String {
    format!("{}{}", name.bold(), ":".dimmed())
}

/// Section header with underline.
pub fn section_header(title: &str) -> String {
    format!("\n{}", title.bold().underline())
}
