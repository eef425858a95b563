//! Event publication. Sinks are best-effort: a misbehaving sink must never
//! disturb the pipeline.

use cdm_core::CommandEvent;
use std::sync::Arc;
use tracing::{info, warn};

pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: CommandEvent);
}

/// Publishes events as structured log lines.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, event: CommandEvent) {
        match &event {
            CommandEvent::Queued {
                command_id,
                command,
                queue_position,
            } => info!(%command_id, %command, queue_position, "command queued"),
            CommandEvent::Executing {
                command_id,
                command,
            } => info!(%command_id, %command, "command executing"),
            CommandEvent::Heartbeat {
                command_id,
                elapsed,
                details,
            } => info!(
                %command_id,
                elapsed_secs = elapsed.as_secs(),
                %details,
                "command heartbeat"
            ),
            CommandEvent::Completed {
                command_id,
                result,
                elapsed,
            } => info!(
                %command_id,
                elapsed_secs = elapsed.as_secs(),
                result_len = result.len(),
                "command completed"
            ),
            CommandEvent::Failed {
                command_id,
                error,
                elapsed,
            } => warn!(
                %command_id,
                elapsed_secs = elapsed.as_secs(),
                %error,
                "command failed"
            ),
            CommandEvent::Recovery {
                reason,
                step,
                success,
                message,
            } => info!(%reason, ?step, success, %message, "recovery event"),
        }
    }
}

/// Swallows everything.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn publish(&self, _event: CommandEvent) {}
}

/// Fans an event out to several sinks.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn publish(&self, event: CommandEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

/// Keeps the most recent events in a bounded ring for diagnostics.
pub struct RingSink {
    capacity: usize,
    events: std::sync::Mutex<std::collections::VecDeque<RecordedEvent>>,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct RecordedEvent {
    pub at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    pub event: CommandEvent,
}

impl RingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Recorded events, oldest first.
    pub fn recent(&self) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(events) => events.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl NotificationSink for RingSink {
    fn publish(&self, event: CommandEvent) {
        // Heartbeats would dominate the ring without telling anyone much.
        if matches!(event, CommandEvent::Heartbeat { .. }) {
            return;
        }
        if let Ok(mut events) = self.events.lock() {
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(RecordedEvent {
                at: chrono::Utc::now(),
                event,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queued(id: &str) -> CommandEvent {
        CommandEvent::Queued {
            command_id: id.to_string(),
            command: "version".into(),
            queue_position: 0,
        }
    }

    #[test]
    fn test_ring_keeps_newest_events() {
        let ring = RingSink::new(3);
        for i in 0..5 {
            ring.publish(queued(&format!("cmd-{i}")));
        }
        let recent = ring.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].event.command_id(), Some("cmd-2"));
        assert_eq!(recent[2].event.command_id(), Some("cmd-4"));
    }

    #[test]
    fn test_ring_skips_heartbeats() {
        let ring = RingSink::new(10);
        ring.publish(CommandEvent::Heartbeat {
            command_id: "cmd-1".into(),
            elapsed: Duration::from_secs(1),
            details: String::new(),
        });
        ring.publish(queued("cmd-1"));
        assert_eq!(ring.recent().len(), 1);
    }

    #[test]
    fn test_null_and_log_sinks_accept_everything() {
        for sink in [&NullSink as &dyn NotificationSink, &LogSink] {
            sink.publish(queued("cmd-1"));
            sink.publish(CommandEvent::Recovery {
                reason: "test".into(),
                step: cdm_core::RecoveryStep::Started,
                success: true,
                message: String::new(),
            });
        }
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let ring_a = Arc::new(RingSink::new(4));
        let ring_b = Arc::new(RingSink::new(4));
        let fanout = FanoutSink::new(vec![ring_a.clone(), ring_b.clone()]);
        fanout.publish(queued("cmd-1"));
        assert_eq!(ring_a.recent().len(), 1);
        assert_eq!(ring_b.recent().len(), 1);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every published event for assertions.
    pub struct RecordingSink {
        pub events: Mutex<Vec<CommandEvent>>,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        pub fn kinds(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|event| match event {
                    CommandEvent::Queued { .. } => "queued".to_string(),
                    CommandEvent::Executing { .. } => "executing".to_string(),
                    CommandEvent::Heartbeat { .. } => "heartbeat".to_string(),
                    CommandEvent::Completed { .. } => "completed".to_string(),
                    CommandEvent::Failed { .. } => "failed".to_string(),
                    CommandEvent::Recovery { .. } => "recovery".to_string(),
                })
                .collect()
        }
    }

    impl NotificationSink for RecordingSink {
        fn publish(&self, event: CommandEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
