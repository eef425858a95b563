#[derive(thiserror::Error, Debug)]
pub enum DebugError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No active debugger session")]
    NoSession,

    #[error("A debugger session is already active; stop it first")]
    AlreadyActive,

    #[error("Debugger executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to start debugger: {0}")]
    StartFailed(String),

    #[error("Debugger I/O failure: {0}")]
    Io(String),

    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Command cancelled: {0}")]
    Cancelled(String),

    #[error("Recovery exhausted: {attempts} attempt(s) used, cooldown not elapsed or cap reached")]
    RecoveryExhausted { attempts: u32 },

    #[error("Fatal session failure: {0}")]
    Fatal(String),
}

impl DebugError {
    /// True for failures that should trigger a recovery attempt: I/O and
    /// timeout failures, plus anything whose message points at the debugger
    /// or the session itself.
    pub fn is_recovery_trigger(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::Fatal(_) => true,
            Self::Cancelled(_) => false,
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("debugger") || message.contains("session")
            }
        }
    }

    /// Status string used by the tool surface for terminal command states.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Cancelled(_) => "cancelled",
            _ => "failed",
        }
    }
}

impl From<std::io::Error> for DebugError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_display_no_session() {
        assert_eq!(
            DebugError::NoSession.to_string(),
            "No active debugger session"
        );
    }

    #[test]
    fn test_display_timeout() {
        let err = DebugError::Timeout(Duration::from_secs(120));
        assert_eq!(err.to_string(), "Command timed out after 120s");
    }

    #[test]
    fn test_display_invalid_input() {
        let err = DebugError::InvalidInput("empty command".into());
        assert_eq!(err.to_string(), "Invalid input: empty command");
    }

    #[test]
    fn test_io_and_timeout_trigger_recovery() {
        assert!(DebugError::Io("broken pipe".into()).is_recovery_trigger());
        assert!(DebugError::Timeout(Duration::from_secs(1)).is_recovery_trigger());
        assert!(DebugError::Fatal("won't die".into()).is_recovery_trigger());
    }

    #[test]
    fn test_cancelled_never_triggers_recovery() {
        assert!(!DebugError::Cancelled("user".into()).is_recovery_trigger());
    }

    #[test]
    fn test_message_matching_triggers_recovery() {
        // "No active debugger session" contains both keywords.
        assert!(DebugError::NoSession.is_recovery_trigger());
        // StartFailed message mentions "debugger".
        assert!(DebugError::StartFailed("spawn error".into()).is_recovery_trigger());
        // InvalidInput with a neutral message does not.
        assert!(!DebugError::InvalidInput("bad id".into()).is_recovery_trigger());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(DebugError::Cancelled("x".into()).status_label(), "cancelled");
        assert_eq!(
            DebugError::Timeout(Duration::from_secs(1)).status_label(),
            "failed"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DebugError>();
    }
}
