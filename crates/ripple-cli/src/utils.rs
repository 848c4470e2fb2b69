//! Shared utilities

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Format a delay in milliseconds as seconds for status lines
pub fn format_delay(delay_ms: u64) -> String {
    if delay_ms % 1000 == 0 {
        format!("{}s", delay_ms / 1000)
    } else {
        format!("{:.1}s", delay_ms as f64 / 1000.0)
    }
}
