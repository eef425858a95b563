//! Serialized command pipeline: queue/dispatcher, per-command timeouts,
//! recovery orchestration, and event publication.

mod classify;
mod executor;
mod notify;
mod queue;
mod recovery;
mod sanitize;
mod stats;
mod timeout;

pub use classify::{DefaultClassifier, TimeoutClassifier};
pub use executor::RecoveryExecutor;
pub use notify::{FanoutSink, LogSink, NotificationSink, NullSink, RecordedEvent, RingSink};
pub use queue::{CommandQueue, CommandStatus, QueueSnapshot, QueuedCommand};
pub use recovery::{CancelAllFn, RecoveryAttempt, RecoveryOrchestrator};
pub use sanitize::sanitize_command;
pub use stats::{QueueStats, QueueStatsSnapshot};
pub use timeout::{TimeoutCallback, TimeoutManager};
