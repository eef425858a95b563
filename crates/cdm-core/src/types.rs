use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued debugger command.
///
/// `Queued → Executing → {Completed | Cancelled | Failed}`; terminal states
/// are sticky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    Queued,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_transition_to(&self, next: CommandState) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Executing | Self::Cancelled),
            Self::Executing => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!CommandState::Queued.is_terminal());
        assert!(!CommandState::Executing.is_terminal());
        assert!(CommandState::Completed.is_terminal());
        assert!(CommandState::Cancelled.is_terminal());
        assert!(CommandState::Failed.is_terminal());
    }

    #[test]
    fn test_queued_transitions() {
        assert!(CommandState::Queued.can_transition_to(CommandState::Executing));
        assert!(CommandState::Queued.can_transition_to(CommandState::Cancelled));
        assert!(!CommandState::Queued.can_transition_to(CommandState::Completed));
        assert!(!CommandState::Queued.can_transition_to(CommandState::Failed));
    }

    #[test]
    fn test_executing_transitions() {
        assert!(CommandState::Executing.can_transition_to(CommandState::Completed));
        assert!(CommandState::Executing.can_transition_to(CommandState::Cancelled));
        assert!(CommandState::Executing.can_transition_to(CommandState::Failed));
        assert!(!CommandState::Executing.can_transition_to(CommandState::Queued));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in [
            CommandState::Completed,
            CommandState::Cancelled,
            CommandState::Failed,
        ] {
            for next in [
                CommandState::Queued,
                CommandState::Executing,
                CommandState::Completed,
                CommandState::Cancelled,
                CommandState::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&CommandState::Executing).unwrap();
        assert_eq!(json, "\"executing\"");
        let back: CommandState = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(back, CommandState::Completed);
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(CommandState::Queued.to_string(), "queued");
        assert_eq!(CommandState::Failed.to_string(), "failed");
    }
}
