//! Id and fingerprint helpers.
//!
//! Command and session ids are ULIDs with a short prefix so log lines and
//! JSON payloads are self-describing.

use sha2::{Digest, Sha256};

pub const COMMAND_ID_PREFIX: &str = "cmd-";
pub const SESSION_ID_PREFIX: &str = "sess-";

/// Allocate a fresh command id (`cmd-<ULID>`).
pub fn new_command_id() -> String {
    format!("{}{}", COMMAND_ID_PREFIX, ulid::Ulid::new())
}

/// Allocate a fresh session id (`sess-<ULID>`).
pub fn new_session_id() -> String {
    format!("{}{}", SESSION_ID_PREFIX, ulid::Ulid::new())
}

/// Stable fingerprint of a command within a session, for result caching
/// keyed by what was run rather than by submission.
pub fn command_fingerprint(session_id: &str, command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(command.as_bytes());
    let digest = hasher.finalize();
    // 16 hex chars is plenty for an in-process map key.
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}
