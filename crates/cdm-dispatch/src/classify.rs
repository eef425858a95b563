//! Per-command timeout classification.
//!
//! A pure function of the command text decides whether a command gets the
//! default or the extended deadline. The classifier is pluggable; the
//! default list covers the debugger commands known to run for minutes.

use cdm_config::QueueSettings;
use std::time::Duration;

pub trait TimeoutClassifier: Send + Sync {
    /// Deadline for `command` under the given queue settings.
    fn timeout_for(&self, command: &str, settings: &QueueSettings) -> Duration;
}

/// Extended-timeout triggers: crash analysis, module/symbol enumeration,
/// all-thread stack walks, and pool scans.
const EXTENDED_PREFIXES: &[&str] = &[
    "!analyze",
    "lm",
    "~*k",
    "~*e",
    "!for_each_module",
    "!poolused",
    ".dumpdebug",
];
const EXTENDED_SUBSTRINGS: &[&str] = &["!process 0 7", "!vm 2"];

pub struct DefaultClassifier;

impl DefaultClassifier {
    /// True when `command` belongs to the long-running set.
    pub fn is_extended(command: &str) -> bool {
        let trimmed = command.trim().to_lowercase();
        EXTENDED_PREFIXES
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
            || EXTENDED_SUBSTRINGS
                .iter()
                .any(|needle| trimmed.contains(needle))
    }
}

impl TimeoutClassifier for DefaultClassifier {
    fn timeout_for(&self, command: &str, settings: &QueueSettings) -> Duration {
        let lowered = command.trim().to_lowercase();
        let configured_match = settings
            .extended_command_patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && lowered.contains(&pattern.to_lowercase()));
        if configured_match || Self::is_extended(command) {
            settings.extended_command_timeout()
        } else {
            settings.default_command_timeout()
        }
    }
}
