//! Single-consumer command queue.
//!
//! `enqueue` always succeeds with an id; one dispatcher task pulls commands
//! FIFO and runs them through the recovery-wrapped executor, so the debugger
//! only ever sees one command at a time. Terminal states are sticky and the
//! completion waiter fires exactly once.

use crate::executor::RecoveryExecutor;
use crate::notify::NotificationSink;
use crate::recovery::CancelAllFn;
use crate::sanitize::sanitize_command;
use crate::stats::{QueueStats, QueueStatsSnapshot};
use crate::timeout::TimeoutManager;
use cdm_config::QueueSettings;
use cdm_core::{CommandEvent, CommandState, DebugError, format_elapsed, new_command_id};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Commands whose classified timeout exceeds this get heartbeat events.
const HEARTBEAT_MIN_TIMEOUT: Duration = Duration::from_secs(30);

struct CommandEntry {
    text: String,
    seq: u64,
    queued_at: DateTime<Utc>,
    queued_instant: Instant,
    started_instant: Option<Instant>,
    completed_instant: Option<Instant>,
    state: CommandState,
    result: Option<String>,
    error: Option<String>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// Point-in-time view of one command.
#[derive(Clone, Debug, Serialize)]
pub struct CommandStatus {
    pub command_id: String,
    pub command: String,
    pub state: CommandState,
    pub queued_at: DateTime<Utc>,
    pub elapsed_secs: u64,
    /// Position among queued commands; -1 once executing or terminal.
    pub queue_position: i64,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueuedCommand {
    pub command_id: String,
    pub command: String,
    pub state: CommandState,
    pub wait_secs: u64,
    pub status_line: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueSnapshot {
    pub executing: Option<QueuedCommand>,
    pub queued: Vec<QueuedCommand>,
}

struct QueueInner {
    commands: DashMap<String, CommandEntry>,
    tx: mpsc::UnboundedSender<String>,
    current: Mutex<Option<String>>,
    seq: AtomicU64,
    sink: Arc<dyn NotificationSink>,
    timeouts: Arc<TimeoutManager>,
    executor: Arc<RecoveryExecutor>,
    settings: QueueSettings,
    stats: QueueStats,
    shutdown: CancellationToken,
}

pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    /// Build the queue and start its dispatcher and retention tasks. Must be
    /// called from within a tokio runtime.
    pub fn new(
        executor: Arc<RecoveryExecutor>,
        timeouts: Arc<TimeoutManager>,
        sink: Arc<dyn NotificationSink>,
        settings: QueueSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(QueueInner {
            commands: DashMap::new(),
            tx,
            current: Mutex::new(None),
            seq: AtomicU64::new(0),
            sink,
            timeouts,
            executor,
            settings,
            stats: QueueStats::new(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(dispatcher_loop(inner.clone(), rx));
        tokio::spawn(retention_loop(inner.clone()));

        Self { inner }
    }

    /// Admit a command. Always returns an id; execution problems surface
    /// later through `status`/`get_result`.
    pub fn enqueue(&self, text: &str) -> Result<String, DebugError> {
        self.inner.enqueue(text)
    }

    /// Signal cancellation for `id`. True when a non-terminal command was
    /// found and signalled; terminal commands are left unchanged.
    pub fn cancel(&self, id: &str, reason: &str) -> bool {
        self.inner.cancel(id, reason)
    }

    /// Cancel every pending and executing command. Returns the count
    /// signalled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.inner.cancel_all(reason)
    }

    pub fn status(&self, id: &str) -> Option<CommandStatus> {
        self.inner.status(id)
    }

    pub fn list(&self) -> QueueSnapshot {
        self.inner.list()
    }

    /// Wait for `id` to reach a terminal state and return its result text
    /// (the error message for failures). Safe to call repeatedly.
    pub async fn get_result(&self, id: &str) -> Result<String, DebugError> {
        self.inner.get_result(id).await
    }

    /// Closure handing `cancel_all` to the recovery orchestrator without a
    /// reference cycle.
    pub fn cancel_all_fn(&self) -> CancelAllFn {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |reason: &str| {
            inner.upgrade().map(|i| i.cancel_all(reason)).unwrap_or(0)
        })
    }

    /// Drop terminal commands older than the retention window. The retention
    /// task calls this periodically; tests may drive it directly.
    pub fn sweep_retention(&self) -> usize {
        self.inner.sweep_retention()
    }

    /// Lifetime counters: enqueued/completed/failed/cancelled and average
    /// execution time.
    pub fn statistics(&self) -> QueueStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Stop the dispatcher and cancel all outstanding work.
    pub fn shutdown(&self, reason: &str) {
        self.inner.cancel_all(reason);
        self.inner.shutdown.cancel();
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl QueueInner {
    fn enqueue(&self, text: &str) -> Result<String, DebugError> {
        let text = sanitize_command(text)?;

        let id = new_command_id();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = watch::channel(false);
        let queue_position = self.queued_count();

        self.commands.insert(
            id.clone(),
            CommandEntry {
                text: text.to_string(),
                seq,
                queued_at: Utc::now(),
                queued_instant: Instant::now(),
                started_instant: None,
                completed_instant: None,
                state: CommandState::Queued,
                result: None,
                error: None,
                cancel: CancellationToken::new(),
                done_tx,
                done_rx,
            },
        );

        if self.tx.send(id.clone()).is_err() {
            self.commands.remove(&id);
            return Err(DebugError::Fatal("command dispatcher has stopped".into()));
        }
        self.stats.record_enqueued();

        self.sink.publish(CommandEvent::Queued {
            command_id: id.clone(),
            command: text.to_string(),
            queue_position,
        });
        Ok(id)
    }

    fn queued_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|entry| entry.state == CommandState::Queued)
            .count()
    }

    async fn process(&self, id: &str) {
        // Claim the command; skip anything cancelled while queued.
        let claimed = {
            let Some(mut entry) = self.commands.get_mut(id) else {
                return;
            };
            if entry.state.is_terminal() {
                return;
            }
            if entry.cancel.is_cancelled() {
                // Raced with cancel(): settle it without touching the session.
                Self::settle(&mut entry, CommandState::Cancelled, None, Some("Cancelled".into()));
                return;
            }
            entry.state = CommandState::Executing;
            entry.started_instant = Some(Instant::now());
            (entry.text.clone(), entry.cancel.clone())
        };
        let (text, cancel_token) = claimed;

        if let Ok(mut current) = self.current.lock() {
            *current = Some(id.to_string());
        }
        self.sink.publish(CommandEvent::Executing {
            command_id: id.to_string(),
            command: text.clone(),
        });

        let classified = self.executor.classified_timeout(&text);
        let heartbeat = if classified > HEARTBEAT_MIN_TIMEOUT {
            Some(self.spawn_heartbeat(id, &text))
        } else {
            None
        };

        let started = Instant::now();
        let result = self
            .executor
            .execute_with_recovery(id, &text, &cancel_token)
            .await;
        let elapsed = started.elapsed();

        if let Some(heartbeat) = heartbeat {
            heartbeat.cancel();
        }
        self.timeouts.cancel(id);

        match result {
            Ok(output) => {
                debug!(
                    command_id = id,
                    summary = %cdm_session::summarize(&output),
                    "command output"
                );
                self.finish(id, CommandState::Completed, Some(output.clone()), None);
                self.stats.record_completed(elapsed);
                self.sink.publish(CommandEvent::Completed {
                    command_id: id.to_string(),
                    result: output,
                    elapsed,
                });
            }
            Err(DebugError::Cancelled(msg)) => {
                self.finish(
                    id,
                    CommandState::Cancelled,
                    None,
                    Some(format!("Cancelled: {msg}")),
                );
                self.stats.record_cancelled();
                self.sink.publish(CommandEvent::Failed {
                    command_id: id.to_string(),
                    error: format!("cancelled: {msg}"),
                    elapsed,
                });
            }
            Err(err) => {
                // The error message doubles as the result so pollers that
                // only read `result` still see what happened.
                let message = err.to_string();
                self.finish(
                    id,
                    CommandState::Failed,
                    Some(message.clone()),
                    Some(message.clone()),
                );
                self.stats.record_failed(elapsed);
                self.sink.publish(CommandEvent::Failed {
                    command_id: id.to_string(),
                    error: message,
                    elapsed,
                });
            }
        }

        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    fn finish(
        &self,
        id: &str,
        state: CommandState,
        result: Option<String>,
        error: Option<String>,
    ) {
        let Some(mut entry) = self.commands.get_mut(id) else {
            return;
        };
        Self::settle(&mut entry, state, result, error);
    }

    fn settle(
        entry: &mut CommandEntry,
        state: CommandState,
        result: Option<String>,
        error: Option<String>,
    ) {
        if entry.state.is_terminal() {
            return;
        }
        entry.state = state;
        entry.completed_instant = Some(Instant::now());
        entry.result = result;
        entry.error = error;
        let _ = entry.done_tx.send(true);
    }

    fn spawn_heartbeat(&self, id: &str, text: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let sink = self.sink.clone();
        let interval = self.settings.heartbeat_interval();
        let command_id = id.to_string();
        let command = text.to_string();
        let started = Instant::now();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick is immediate; the heartbeat cadence starts one
            // interval in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        sink.publish(CommandEvent::Heartbeat {
                            command_id: command_id.clone(),
                            elapsed: started.elapsed(),
                            details: format!(
                                "still executing '{command}' after {}; waiting for debugger output",
                                format_elapsed(started.elapsed())
                            ),
                        });
                    }
                }
            }
        });
        token
    }

    fn cancel(&self, id: &str, reason: &str) -> bool {
        let queued_elapsed = {
            let Some(mut entry) = self.commands.get_mut(id) else {
                return false;
            };
            if entry.state.is_terminal() {
                return false;
            }
            entry.cancel.cancel();
            if entry.state == CommandState::Queued {
                let elapsed = entry.queued_instant.elapsed();
                Self::settle(
                    &mut entry,
                    CommandState::Cancelled,
                    None,
                    Some(format!("Cancelled: {reason}")),
                );
                self.stats.record_cancelled();
                Some(elapsed)
            } else {
                // Executing: the session's read loop observes the token and
                // the dispatcher settles the command.
                None
            }
        };

        self.timeouts.cancel(id);
        if let Some(elapsed) = queued_elapsed {
            self.sink.publish(CommandEvent::Failed {
                command_id: id.to_string(),
                error: format!("cancelled while queued: {reason}"),
                elapsed,
            });
        }
        debug!(command_id = id, reason, "command cancellation signalled");
        true
    }

    fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self
            .commands
            .iter()
            .filter(|entry| !entry.state.is_terminal())
            .map(|entry| entry.key().clone())
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id, reason) {
                cancelled += 1;
            }
        }
        info!(reason, cancelled, "cancelled all queued and executing commands");
        cancelled
    }

    fn status(&self, id: &str) -> Option<CommandStatus> {
        let entry = self.commands.get(id)?;
        let queue_position = if entry.state == CommandState::Queued {
            self.commands
                .iter()
                .filter(|other| other.state == CommandState::Queued && other.seq < entry.seq)
                .count() as i64
        } else {
            -1
        };
        let elapsed = match entry.completed_instant {
            Some(completed) => completed.duration_since(entry.queued_instant),
            None => entry.queued_instant.elapsed(),
        };

        Some(CommandStatus {
            command_id: id.to_string(),
            command: entry.text.clone(),
            state: entry.state,
            queued_at: entry.queued_at,
            elapsed_secs: elapsed.as_secs(),
            queue_position,
            is_completed: entry.state.is_terminal(),
            result: entry.result.clone(),
            error: entry.error.clone(),
        })
    }

    fn list(&self) -> QueueSnapshot {
        let executing_id = self
            .current
            .lock()
            .ok()
            .and_then(|current| current.clone());

        let executing = executing_id.and_then(|id| {
            self.commands.get(&id).map(|entry| {
                let executing_for = entry
                    .started_instant
                    .map(|started| started.elapsed())
                    .unwrap_or_default();
                QueuedCommand {
                    command_id: id.clone(),
                    command: entry.text.clone(),
                    state: entry.state,
                    wait_secs: entry.queued_instant.elapsed().as_secs(),
                    status_line: format!("executing for {}", format_elapsed(executing_for)),
                }
            })
        });

        let mut queued: Vec<(u64, QueuedCommand)> = self
            .commands
            .iter()
            .filter(|entry| entry.state == CommandState::Queued)
            .map(|entry| {
                (
                    entry.seq,
                    QueuedCommand {
                        command_id: entry.key().clone(),
                        command: entry.text.clone(),
                        state: entry.state,
                        wait_secs: entry.queued_instant.elapsed().as_secs(),
                        status_line: String::new(),
                    },
                )
            })
            .collect();
        queued.sort_by_key(|(seq, _)| *seq);

        let queued: Vec<QueuedCommand> = queued
            .into_iter()
            .enumerate()
            .map(|(position, (_, mut command))| {
                command.status_line = format!(
                    "queued at position {position} for {}",
                    format_elapsed(Duration::from_secs(command.wait_secs))
                );
                command
            })
            .collect();

        QueueSnapshot { executing, queued }
    }

    async fn get_result(&self, id: &str) -> Result<String, DebugError> {
        let mut done_rx = self
            .commands
            .get(id)
            .ok_or_else(|| DebugError::InvalidInput(format!("unknown command id '{id}'")))?
            .done_rx
            .clone();

        done_rx
            .wait_for(|done| *done)
            .await
            .map_err(|_| DebugError::Fatal("command entry dropped before completion".into()))?;

        let entry = self
            .commands
            .get(id)
            .ok_or_else(|| DebugError::InvalidInput(format!("unknown command id '{id}'")))?;
        Ok(entry
            .result
            .clone()
            .or_else(|| entry.error.clone())
            .unwrap_or_default())
    }

    fn sweep_retention(&self) -> usize {
        let retention = self.settings.retention();
        let before = self.commands.len();
        self.commands.retain(|_, entry| {
            !(entry.state.is_terminal() && entry.queued_instant.elapsed() > retention)
        });
        let removed = before - self.commands.len();
        if removed > 0 {
            debug!(removed, "retention sweep removed settled commands");
        }
        removed
    }
}

async fn dispatcher_loop(inner: Arc<QueueInner>, mut rx: mpsc::UnboundedReceiver<String>) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = rx.recv() => match next {
                None => break,
                Some(id) => inner.process(&id).await,
            }
        }
    }
    debug!("dispatcher loop ended");
}

async fn retention_loop(inner: Arc<QueueInner>) {
    let mut ticker = tokio::time::interval(inner.settings.cleanup_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                inner.sweep_retention();
            }
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
