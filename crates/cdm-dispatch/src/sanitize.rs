//! Command admission rules.
//!
//! The queue owns the debugger process; raw client text must not be able to
//! kill it or desynchronize the prompt protocol. Session-lifecycle commands
//! are rejected at enqueue (the tool surface has dedicated operations for
//! them), and control characters are stripped before the text reaches the
//! debugger's stdin.

use cdm_core::DebugError;

/// Commands that would terminate or detach the debugger out from under the
/// queue. Matched against the first token, case-insensitively.
const SESSION_LIFECYCLE_COMMANDS: &[&str] = &[
    "q", "qq", "qd", ".kill", ".detach", ".restart", ".abandon", ".leave",
];

/// Validate and normalize a client-submitted debugger command.
///
/// Returns the cleaned text to enqueue. Rejects empty input, embedded
/// control characters that would be interpreted as extra input lines, and
/// session-lifecycle commands.
pub fn sanitize_command(text: &str) -> Result<String, DebugError> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        return Err(DebugError::InvalidInput("empty debugger command".into()));
    }

    let first_token = cleaned
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if SESSION_LIFECYCLE_COMMANDS.contains(&first_token.as_str()) {
        return Err(DebugError::InvalidInput(format!(
            "'{first_token}' would terminate the session; use close_session instead"
        )));
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_commands_pass_through() {
        assert_eq!(sanitize_command("!analyze -v").unwrap(), "!analyze -v");
        assert_eq!(sanitize_command("  kb  ").unwrap(), "kb");
        assert_eq!(sanitize_command("dd esp L8").unwrap(), "dd esp L8");
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            sanitize_command("   "),
            Err(DebugError::InvalidInput(_))
        ));
        assert!(matches!(
            sanitize_command(""),
            Err(DebugError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_quit_variants_rejected() {
        for cmd in ["q", "Q", "qq", "qd", "  q  "] {
            assert!(
                matches!(sanitize_command(cmd), Err(DebugError::InvalidInput(_))),
                "{cmd:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_lifecycle_dot_commands_rejected() {
        for cmd in [".kill", ".detach", ".restart", ".abandon"] {
            assert!(
                matches!(sanitize_command(cmd), Err(DebugError::InvalidInput(_))),
                "{cmd:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_prefix_match_only_hits_first_token() {
        // `qd` as an argument is fine; only the leading token is lifecycle.
        assert!(sanitize_command("x nt!qd*").is_ok());
        // `.reload` is not a lifecycle command.
        assert!(sanitize_command(".reload /f").is_ok());
    }

    #[test]
    fn test_embedded_newlines_stripped() {
        // A second line smuggled into the text must not reach the debugger
        // as its own command.
        let cleaned = sanitize_command("version\nq").unwrap();
        assert_eq!(cleaned, "versionq");
        assert!(!cleaned.contains('\n'));
    }

    #[test]
    fn test_tabs_survive() {
        assert_eq!(sanitize_command("bp\tkernel32!CreateFileW").unwrap(), "bp\tkernel32!CreateFileW");
    }
}
