//! The owning root of the pipeline: one debugger session, its command queue,
//! recovery, and the result cache, assembled per the constructor-injection
//! scheme that keeps session/queue/recovery free of reference cycles.

use cdm_cache::ResultCache;
use cdm_config::ServerConfig;
use cdm_core::{CommandEvent, CommandState, DebugError};
use cdm_dispatch::{
    CommandQueue, DefaultClassifier, FanoutSink, LogSink, NotificationSink, RecoveryExecutor,
    RecoveryOrchestrator, RingSink, TimeoutManager,
};
use cdm_session::{CdbSession, HealthMonitor, LaunchTarget};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Copies completed command results into the cache so polls keep working
/// after the queue's retention sweep drops the live entry.
struct CacheSink {
    cache: Arc<ResultCache<String>>,
}

impl NotificationSink for CacheSink {
    fn publish(&self, event: CommandEvent) {
        if let CommandEvent::Completed {
            command_id, result, ..
        } = event
        {
            self.cache.set(&command_id, result, None);
        }
    }
}

/// Recent non-heartbeat events kept for the diagnostics payload.
const EVENT_HISTORY_CAP: usize = 50;

impl Drop for DebugServer {
    fn drop(&mut self) {
        self.watchdog.cancel();
    }
}

pub struct DebugServer {
    session: Arc<CdbSession>,
    queue: CommandQueue,
    recovery: Arc<RecoveryOrchestrator>,
    health: Arc<HealthMonitor>,
    cache: Arc<ResultCache<String>>,
    events: Arc<RingSink>,
    watchdog: CancellationToken,
}

impl DebugServer {
    /// Assemble the pipeline. Must be called from within a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let session = Arc::new(CdbSession::new(config.debugger.clone()));
        let health = Arc::new(HealthMonitor::new(
            session.clone(),
            config.recovery.health_check_interval(),
        ));
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let events = Arc::new(RingSink::new(EVENT_HISTORY_CAP));

        let sink: Arc<dyn NotificationSink> = Arc::new(FanoutSink::new(vec![
            Arc::new(LogSink),
            Arc::new(CacheSink {
                cache: cache.clone(),
            }),
            events.clone(),
        ]));

        let recovery = Arc::new(RecoveryOrchestrator::new(
            session.clone(),
            health.clone(),
            sink.clone(),
            config.recovery.clone(),
        ));
        let timeouts = Arc::new(TimeoutManager::new());
        let executor = Arc::new(RecoveryExecutor::new(
            session.clone(),
            timeouts.clone(),
            recovery.clone(),
            Arc::new(DefaultClassifier),
            config.queue.clone(),
        ));
        let queue = CommandQueue::new(executor, timeouts, sink, config.queue.clone());
        recovery.install_cancel_all(queue.cancel_all_fn());

        let server = Self {
            session,
            queue,
            recovery,
            health,
            cache,
            events,
            watchdog: CancellationToken::new(),
        };
        server.spawn_health_watchdog(config.recovery.health_check_interval());
        server
    }

    /// Periodic liveness sweep: when the queue is idle and a check is due,
    /// probe the debugger and hand a wedged session to recovery.
    fn spawn_health_watchdog(&self, interval: std::time::Duration) {
        let session = self.session.clone();
        let health = self.health.clone();
        let recovery = self.recovery.clone();
        let token = self.watchdog.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !session.is_active() || !health.is_check_due() {
                            continue;
                        }
                        // The probe shares the debugger's stdio; only run it
                        // while no command is in flight.
                        if session.has_operation_in_flight() {
                            continue;
                        }
                        if !health.is_responsive().await {
                            warn!("scheduled health check failed; attempting recovery");
                            let recovered = recovery.recover("scheduled health check failed").await;
                            if !recovered {
                                warn!("health-triggered recovery declined or failed");
                            }
                        }
                    }
                }
            }
        });
    }

    /// Open a crash dump. An existing session is closed first.
    pub async fn open_dump(
        &self,
        dump_path: &str,
        symbols_path: Option<String>,
    ) -> Result<String, DebugError> {
        if dump_path.trim().is_empty() {
            return Err(DebugError::InvalidInput("dump_path is required".into()));
        }
        let path = PathBuf::from(dump_path);
        if !path.is_file() {
            return Err(DebugError::InvalidInput(format!(
                "dump file not found: {dump_path}"
            )));
        }
        crate::dumps::validate_dump_header(&path)
            .map_err(|e| DebugError::InvalidInput(e.to_string()))?;

        self.replace_session().await?;
        let session_id = self
            .session
            .start(LaunchTarget::DumpFile {
                path,
                symbols: symbols_path,
            })
            .await?;
        Ok(format!(
            "Opened crash dump {dump_path} (session {session_id})"
        ))
    }

    /// Attach to a remote debugger connection string.
    pub async fn open_remote(
        &self,
        connection: &str,
        symbols_path: Option<String>,
    ) -> Result<String, DebugError> {
        if connection.trim().is_empty() {
            return Err(DebugError::InvalidInput(
                "connection_string is required".into(),
            ));
        }

        self.replace_session().await?;
        let session_id = self
            .session
            .start(LaunchTarget::Remote {
                connection: connection.to_string(),
                symbols: symbols_path,
            })
            .await?;
        Ok(format!(
            "Connected to remote debugger {connection} (session {session_id})"
        ))
    }

    async fn replace_session(&self) -> Result<(), DebugError> {
        if self.session.is_active() {
            let cancelled = self.queue.cancel_all("session replaced");
            info!(cancelled, "closing previous session before opening a new one");
            self.session.stop().await?;
        }
        Ok(())
    }

    /// Cancel outstanding work and stop the debugger.
    pub async fn close_session(&self) -> Result<String, DebugError> {
        let cancelled = self.queue.cancel_all("session closing");
        self.session.stop().await?;
        Ok(format!(
            "Session closed; {cancelled} outstanding command(s) cancelled"
        ))
    }

    /// Queue a command. Always answers with an id and `status: "queued"`;
    /// outcomes are polled via `get_command_status`.
    pub fn run_command_async(&self, command: &str) -> Result<Value, DebugError> {
        let command_id = self.queue.enqueue(command)?;
        Ok(json!({
            "commandId": command_id,
            "status": "queued",
            "message": format!("Command '{command}' queued for execution"),
            "instructions": "Poll get_command_status with this commandId every 5-15 seconds; results are never returned here.",
        }))
    }

    pub fn command_status(&self, command_id: &str) -> Value {
        if let Some(status) = self.queue.status(command_id) {
            let mut payload = json!({
                "commandId": status.command_id,
                "command": status.command,
                "status": status.state.as_str(),
                "queuedAt": status.queued_at.to_rfc3339(),
                "waitTimeSecs": status.elapsed_secs,
                "queuePosition": status.queue_position,
                "isCompleted": status.is_completed,
            });
            if status.state == CommandState::Completed
                && let Some(result) = status.result
            {
                payload["result"] = Value::String(result);
            } else if let Some(error) = status.error {
                payload["error"] = Value::String(error.clone());
                payload["result"] = Value::String(error);
            }
            return payload;
        }

        // Settled and swept from the queue; completed results live on in the
        // cache until their TTL expires.
        if let Some(result) = self.cache.try_get(command_id) {
            return json!({
                "commandId": command_id,
                "status": "completed",
                "isCompleted": true,
                "result": result,
                "note": "served from result cache",
            });
        }

        json!({
            "commandId": command_id,
            "status": "not_found",
            "error": format!("unknown command id '{command_id}'"),
        })
    }

    pub fn cancel_command(&self, command_id: &str, reason: &str) -> bool {
        self.queue.cancel(command_id, reason)
    }

    pub fn list_commands(&self) -> Value {
        let snapshot = self.queue.list();
        json!({
            "currentlyExecuting": snapshot.executing,
            "queued": snapshot.queued,
            "sessionActive": self.session.is_active(),
            "session": self.session.info(),
            "diagnostics": {
                "health": self.health.diagnostics(),
                "cache": self.cache.statistics(),
                "queue": self.queue.statistics(),
                "recoveryHistory": self.recovery.history(),
                "recentEvents": self.events.recent(),
            },
        })
    }

    pub fn is_session_active(&self) -> bool {
        self.session.is_active()
    }

    /// Graceful teardown for process exit.
    pub async fn shutdown(&self) {
        self.watchdog.cancel();
        self.queue.shutdown("server shutting down");
        let _ = self.session.stop().await;
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
