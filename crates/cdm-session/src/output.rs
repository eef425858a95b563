//! Helpers for debugger output: size capping and log summaries.
//!
//! Debugger commands can produce megabytes of text; the session caps what it
//! accumulates, and log lines carry a one-line summary instead of the full
//! dump.

/// Appended when a command's output hits the accumulation cap.
pub const TRUNCATION_NOTICE: &str = "\n[output truncated: accumulation cap reached]";

/// Cap `text` at `max_bytes`, cutting on a character boundary and appending
/// a truncation notice. Returns whether truncation happened.
pub fn cap_output(text: &mut String, max_bytes: usize) -> bool {
    if text.len() <= max_bytes {
        return false;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_NOTICE);
    true
}

/// One-line summary of command output: the last non-empty line, truncated to
/// 200 characters.
pub fn summarize(output: &str) -> String {
    truncate_line(last_non_empty_line(output), 200)
}

fn last_non_empty_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    if line.chars().nth(max_chars).is_none() {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(max_chars - 3).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_leaves_short_output_alone() {
        let mut text = "short".to_string();
        assert!(!cap_output(&mut text, 100));
        assert_eq!(text, "short");
    }

    #[test]
    fn test_cap_truncates_and_marks() {
        let mut text = "x".repeat(100);
        assert!(cap_output(&mut text, 10));
        assert!(text.starts_with("xxxxxxxxxx"));
        assert!(text.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn test_cap_respects_char_boundaries() {
        // '🔥' is 4 bytes; a cap in the middle must not split it.
        let mut text = "🔥🔥🔥".to_string();
        assert!(cap_output(&mut text, 5));
        assert!(text.starts_with('🔥'));
        assert!(!text.starts_with("🔥🔥"));
    }

    #[test]
    fn test_summary_is_last_non_empty_line() {
        assert_eq!(summarize("first\nsecond\n\n"), "second");
        assert_eq!(summarize(""), "");
    }

    #[test]
    fn test_summary_truncates_long_lines() {
        let long = "a".repeat(250);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), 200);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_summary_exactly_at_limit() {
        let exact = "a".repeat(200);
        let summary = summarize(&exact);
        assert_eq!(summary.chars().count(), 200);
        assert!(!summary.ends_with("..."));
    }
}
