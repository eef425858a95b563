//! Completion detection for debugger output.
//!
//! cdb signals readiness with a numbered prompt (`0:000> `) printed without a
//! trailing newline. A command is complete when the pending line matches the
//! prompt shape, or, in marker mode, when a line carries the end marker the
//! command was wrapped with.

use regex::Regex;
use std::sync::LazyLock;

static PROMPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    // <processor>:<thread>> with nothing else on the line.
    Regex::new(r"^\s*\d+:\d+>\s*$").expect("prompt regex")
});

const MARKER_PREFIX: &str = "CDM_MARK";

/// True when `line` is the debugger's ready prompt and nothing else.
pub fn is_prompt_line(line: &str) -> bool {
    PROMPT_RE.is_match(line)
}

/// Start marker echoed before a wrapped command.
pub fn start_marker(nonce: u64) -> String {
    format!("{MARKER_PREFIX}_START_{nonce:016x}")
}

/// End marker echoed after a wrapped command; its presence in a line
/// completes the read.
pub fn end_marker(nonce: u64) -> String {
    format!("{MARKER_PREFIX}_END_{nonce:016x}")
}
