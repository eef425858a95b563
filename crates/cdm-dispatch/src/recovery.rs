//! Stuck-session recovery: cancel queued work, soft-interrupt the debugger,
//! and as a last resort force-restart it with exponential backoff.

use crate::notify::NotificationSink;
use cdm_config::RecoverySettings;
use cdm_core::{CommandEvent, RecoveryStep};
use cdm_session::{CdbSession, HealthMonitor};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Injected by the queue after construction; breaks the queue/recovery cycle.
pub type CancelAllFn = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const HISTORY_CAP: usize = 20;

struct RecoveryState {
    attempts: u32,
    last_attempt: Option<Instant>,
    recovering: bool,
}

/// One finished recovery run, kept for diagnostics.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RecoveryAttempt {
    pub at: chrono::DateTime<chrono::Utc>,
    pub reason: String,
    pub attempt: u32,
    pub success: bool,
}

pub struct RecoveryOrchestrator {
    session: Arc<CdbSession>,
    health: Arc<HealthMonitor>,
    sink: Arc<dyn NotificationSink>,
    settings: RecoverySettings,
    state: RwLock<RecoveryState>,
    history: std::sync::Mutex<std::collections::VecDeque<RecoveryAttempt>>,
    cancel_all: OnceLock<CancelAllFn>,
}

impl RecoveryOrchestrator {
    pub fn new(
        session: Arc<CdbSession>,
        health: Arc<HealthMonitor>,
        sink: Arc<dyn NotificationSink>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            session,
            health,
            sink,
            settings,
            state: RwLock::new(RecoveryState {
                attempts: 0,
                last_attempt: None,
                recovering: false,
            }),
            history: std::sync::Mutex::new(std::collections::VecDeque::new()),
            cancel_all: OnceLock::new(),
        }
    }

    /// Wire in the queue's cancel-all. Must be called once during assembly.
    pub fn install_cancel_all(&self, cancel_all: CancelAllFn) {
        let _ = self.cancel_all.set(cancel_all);
    }

    pub async fn attempt_count(&self) -> u32 {
        self.state.read().await.attempts
    }

    /// Full recovery ladder: cancel queue, soft-interrupt, probe, restart.
    /// Returns whether the session is usable again. Never panics; internal
    /// failures surface as `false`.
    pub async fn recover(&self, reason: &str) -> bool {
        if !self.session.is_active() {
            debug!(reason, "recovery skipped: no active session");
            return false;
        }
        let Some(attempt) = self.enter_recovery(reason).await else {
            return false;
        };

        let success = self.run_ladder(reason, attempt).await;
        self.leave_recovery(success).await;
        self.record_attempt(reason, attempt, success);
        success
    }

    /// Skip straight to the force-restart rung.
    pub async fn force_restart(&self, reason: &str) -> bool {
        let Some(attempt) = self.enter_recovery(reason).await else {
            return false;
        };

        let success = self.restart_rung(reason, attempt).await;
        self.leave_recovery(success).await;
        self.record_attempt(reason, attempt, success);
        success
    }

    /// Finished recovery runs, oldest first.
    pub fn history(&self) -> Vec<RecoveryAttempt> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn record_attempt(&self, reason: &str, attempt: u32, success: bool) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() == HISTORY_CAP {
                history.pop_front();
            }
            history.push_back(RecoveryAttempt {
                at: chrono::Utc::now(),
                reason: reason.to_string(),
                attempt,
                success,
            });
        }
    }

    /// Claim the exclusive recovery region and count the attempt. `None`
    /// when another recovery is running or the attempt budget is spent.
    async fn enter_recovery(&self, reason: &str) -> Option<u32> {
        let mut state = self.state.write().await;
        if state.recovering {
            debug!(reason, "recovery rejected: already recovering");
            return None;
        }
        // A fully elapsed cooldown opens a fresh attempt window.
        if let Some(last) = state.last_attempt
            && last.elapsed() >= self.settings.cooldown()
        {
            state.attempts = 0;
        }
        if state.attempts >= self.settings.max_attempts {
            warn!(
                reason,
                attempts = state.attempts,
                "recovery rejected: attempt cap reached within cooldown"
            );
            return None;
        }
        state.recovering = true;
        state.attempts += 1;
        state.last_attempt = Some(Instant::now());
        Some(state.attempts)
    }

    async fn leave_recovery(&self, success: bool) {
        let mut state = self.state.write().await;
        state.recovering = false;
        if success {
            state.attempts = 0;
        }
    }

    async fn run_ladder(&self, reason: &str, attempt: u32) -> bool {
        info!(reason, attempt, "recovery started");
        self.emit(reason, RecoveryStep::Started, true, format!("attempt {attempt}"));

        // Step 1: flush the queue so nothing piles up behind a stuck command.
        let cancelled = self.cancel_queued_work(reason);
        self.emit(
            reason,
            RecoveryStep::CancelQueue,
            true,
            format!("cancelled {cancelled} command(s)"),
        );

        // Step 2: interrupt whatever the debugger is chewing on.
        self.session.cancel_current().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.emit(reason, RecoveryStep::SoftInterrupt, true, String::new());

        // Step 3: if the soft interrupt brought the prompt back, done.
        if self.health.is_responsive().await {
            info!(reason, "recovery completed after cancel");
            self.emit(
                reason,
                RecoveryStep::Completed,
                true,
                "responsive after cancel".into(),
            );
            return true;
        }

        // Step 4: the debugger is wedged; restart it.
        self.restart_rung(reason, attempt).await
    }

    async fn restart_rung(&self, reason: &str, attempt: u32) -> bool {
        let cancelled = self.cancel_queued_work(reason);
        self.emit(
            reason,
            RecoveryStep::ForceRestart,
            true,
            format!("restarting; cancelled {cancelled} command(s)"),
        );

        if let Err(e) = self.session.stop().await {
            warn!(reason, error = %e, "recovery failed: stop errored");
            self.emit(reason, RecoveryStep::Failed, false, e.to_string());
            return false;
        }

        tokio::time::sleep(self.backoff_delay(attempt)).await;

        if self.session.is_active() {
            warn!(reason, "recovery failed: debugger process refuses to die");
            self.emit(
                reason,
                RecoveryStep::Failed,
                false,
                "process refuses to die".into(),
            );
            return false;
        }

        match self.session.restart().await {
            Ok(session_id) => {
                self.health.invalidate();
                info!(reason, session_id = %session_id, "recovery completed after restart");
                self.emit(
                    reason,
                    RecoveryStep::Completed,
                    true,
                    "restarted debugger".into(),
                );
                true
            }
            Err(e) => {
                warn!(reason, error = %e, "recovery failed: restart errored");
                self.emit(reason, RecoveryStep::Failed, false, e.to_string());
                false
            }
        }
    }

    fn cancel_queued_work(&self, reason: &str) -> usize {
        match self.cancel_all.get() {
            Some(cancel_all) => cancel_all(reason),
            None => 0,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.settings
            .restart_base_delay()
            .saturating_mul(1u32 << shift)
    }

    fn emit(&self, reason: &str, step: RecoveryStep, success: bool, message: String) {
        self.sink.publish(CommandEvent::Recovery {
            reason: reason.to_string(),
            step,
            success,
            message,
        });
    }
}
