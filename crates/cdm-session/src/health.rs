//! Liveness probes for the debugger session: a cheap cached check and a
//! deeper responsiveness probe used by recovery.

use crate::session::CdbSession;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a cheap verdict is reused before recomputing.
const VERDICT_TTL: Duration = Duration::from_secs(30);
/// Deadline for the deep `.echo` probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_COMMAND: &str = ".echo cdm_health_probe";

#[derive(Clone, Debug, serde::Serialize)]
pub struct HealthDiagnostics {
    pub active: bool,
    pub last_check_secs_ago: Option<u64>,
    pub is_check_due: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct HealthMonitor {
    session: Arc<CdbSession>,
    check_interval: Duration,
    cached: Mutex<Option<(Instant, bool)>>,
    last_check: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
}

impl HealthMonitor {
    pub fn new(session: Arc<CdbSession>, check_interval: Duration) -> Self {
        Self {
            session,
            check_interval,
            cached: Mutex::new(None),
            last_check: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// Cheap check: session active and process not exited. Never fails; the
    /// verdict is cached for thirty seconds.
    pub fn is_healthy(&self) -> bool {
        if let Ok(cached) = self.cached.lock()
            && let Some((at, verdict)) = *cached
            && at.elapsed() < VERDICT_TTL
        {
            return verdict;
        }

        let verdict = self.session.is_active();
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some((Instant::now(), verdict));
        }
        if let Ok(mut last) = self.last_check.lock() {
            *last = Some(Instant::now());
        }
        verdict
    }

    /// Deep probe: the cheap check plus a no-op command with its own short
    /// deadline. Any failure yields `false`.
    pub async fn is_responsive(&self) -> bool {
        if !self.session.is_active() {
            self.record_error("session inactive");
            return false;
        }
        if self.session.has_operation_in_flight() {
            // Cannot share the output stream with a live command; fall back
            // to the cheap verdict.
            return self.is_healthy();
        }

        let token = CancellationToken::new();
        let probe = self.session.execute(PROBE_COMMAND, &token);
        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => {
                if let Ok(mut err) = self.last_error.lock() {
                    *err = None;
                }
                true
            }
            Ok(Err(e)) => {
                self.record_error(&e.to_string());
                false
            }
            Err(_) => {
                token.cancel();
                self.record_error("responsiveness probe timed out");
                false
            }
        }
    }

    /// Forget the cached verdict; recovery calls this after a restart.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    pub fn is_check_due(&self) -> bool {
        match self.last_check.lock() {
            Ok(last) => match *last {
                Some(at) => at.elapsed() >= self.check_interval,
                None => true,
            },
            Err(_) => true,
        }
    }

    pub fn diagnostics(&self) -> HealthDiagnostics {
        let last_check_secs_ago = self
            .last_check
            .lock()
            .ok()
            .and_then(|last| last.map(|at| at.elapsed().as_secs()));
        let error = self.last_error.lock().ok().and_then(|e| e.clone());
        HealthDiagnostics {
            active: self.session.is_active(),
            last_check_secs_ago,
            is_check_due: self.is_check_due(),
            error,
        }
    }

    fn record_error(&self, message: &str) {
        debug!(error = message, "health probe failed");
        if let Ok(mut err) = self.last_error.lock() {
            *err = Some(message.to_string());
        }
    }
}
