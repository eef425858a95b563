//! Notification payloads published while commands move through the queue.

use serde::Serialize;
use std::time::Duration;

/// Recovery step being reported in a [`CommandEvent::Recovery`] event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStep {
    Started,
    CancelQueue,
    SoftInterrupt,
    ForceRestart,
    Completed,
    Failed,
}

/// Best-effort notification events.
///
/// Per command the publication order is total:
/// `Queued < Executing < Heartbeat* < {Completed | Failed}`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommandEvent {
    Queued {
        command_id: String,
        command: String,
        queue_position: usize,
    },
    Executing {
        command_id: String,
        command: String,
    },
    Heartbeat {
        command_id: String,
        elapsed: Duration,
        details: String,
    },
    Completed {
        command_id: String,
        result: String,
        elapsed: Duration,
    },
    Failed {
        command_id: String,
        error: String,
        elapsed: Duration,
    },
    Recovery {
        reason: String,
        step: RecoveryStep,
        success: bool,
        message: String,
    },
}

impl CommandEvent {
    /// Command id this event concerns, if any (recovery events are global).
    pub fn command_id(&self) -> Option<&str> {
        match self {
            Self::Queued { command_id, .. }
            | Self::Executing { command_id, .. }
            | Self::Heartbeat { command_id, .. }
            | Self::Completed { command_id, .. }
            | Self::Failed { command_id, .. } => Some(command_id),
            Self::Recovery { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_accessor() {
        let event = CommandEvent::Executing {
            command_id: "cmd-1".into(),
            command: "version".into(),
        };
        assert_eq!(event.command_id(), Some("cmd-1"));

        let recovery = CommandEvent::Recovery {
            reason: "timeout".into(),
            step: RecoveryStep::Started,
            success: false,
            message: String::new(),
        };
        assert_eq!(recovery.command_id(), None);
    }

    #[test]
    fn test_serialize_tagged() {
        let event = CommandEvent::Failed {
            command_id: "cmd-2".into(),
            error: "boom".into(),
            elapsed: Duration::from_secs(3),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["command_id"], "cmd-2");
    }

    #[test]
    fn test_recovery_step_serializes_kebab_case() {
        let json = serde_json::to_value(RecoveryStep::ForceRestart).unwrap();
        assert_eq!(json, "force-restart");
    }

    #[test]
    fn test_every_variant_serializes_with_kind_tag() {
        let events = [
            CommandEvent::Queued {
                command_id: "cmd-1".into(),
                command: "version".into(),
                queue_position: 0,
            },
            CommandEvent::Executing {
                command_id: "cmd-1".into(),
                command: "version".into(),
            },
            CommandEvent::Heartbeat {
                command_id: "cmd-1".into(),
                elapsed: Duration::from_secs(30),
                details: "still going".into(),
            },
            CommandEvent::Completed {
                command_id: "cmd-1".into(),
                result: "done".into(),
                elapsed: Duration::from_secs(31),
            },
            CommandEvent::Failed {
                command_id: "cmd-1".into(),
                error: "boom".into(),
                elapsed: Duration::from_secs(2),
            },
            CommandEvent::Recovery {
                reason: "stuck".into(),
                step: RecoveryStep::SoftInterrupt,
                success: true,
                message: String::new(),
            },
        ];
        let expected = [
            "queued",
            "executing",
            "heartbeat",
            "completed",
            "failed",
            "recovery",
        ];
        for (event, kind) in events.iter().zip(expected) {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json["kind"], kind);
        }
    }
}
