//! Recovery-wrapped command execution: classified deadlines on top of the
//! session's own read timeout, with failure classification feeding the
//! recovery orchestrator.

use crate::classify::TimeoutClassifier;
use crate::recovery::RecoveryOrchestrator;
use crate::timeout::TimeoutManager;
use cdm_config::QueueSettings;
use cdm_core::DebugError;
use cdm_session::CdbSession;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct RecoveryExecutor {
    session: Arc<CdbSession>,
    timeouts: Arc<TimeoutManager>,
    recovery: Arc<RecoveryOrchestrator>,
    classifier: Arc<dyn TimeoutClassifier>,
    settings: QueueSettings,
}

impl RecoveryExecutor {
    pub fn new(
        session: Arc<CdbSession>,
        timeouts: Arc<TimeoutManager>,
        recovery: Arc<RecoveryOrchestrator>,
        classifier: Arc<dyn TimeoutClassifier>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            session,
            timeouts,
            recovery,
            classifier,
            settings,
        }
    }

    /// Classified deadline for `command`.
    pub fn classified_timeout(&self, command: &str) -> Duration {
        self.classifier.timeout_for(command, &self.settings)
    }

    /// Run `command` under its classified deadline. Timeouts surface as
    /// `Timeout`, external cancellation as `Cancelled`; qualifying failures
    /// trigger a best-effort recovery that never changes the surfaced error.
    pub async fn execute_with_recovery(
        &self,
        command_id: &str,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<String, DebugError> {
        let deadline = self.classified_timeout(command);

        // Composite signal: external cancel plus the classified deadline.
        let composite = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        {
            let composite = composite.clone();
            let timed_out = timed_out.clone();
            let id = command_id.to_string();
            self.timeouts.start(
                command_id,
                deadline,
                Arc::new(move |elapsed| {
                    warn!(
                        command_id = %id,
                        elapsed_secs = elapsed.as_secs(),
                        "classified timeout expired"
                    );
                    timed_out.store(true, Ordering::SeqCst);
                    composite.cancel();
                }),
            )?;
        }

        let result = self.session.execute(command, &composite).await;

        match result {
            Ok(output) => {
                self.timeouts.cancel(command_id);
                Ok(output)
            }
            Err(err) => {
                self.timeouts.cancel(command_id);
                let err = match err {
                    // The deadline fired and surfaced as cancellation.
                    DebugError::Cancelled(_) if timed_out.load(Ordering::SeqCst) => {
                        DebugError::Timeout(deadline)
                    }
                    other => other,
                };
                self.maybe_recover(command_id, &err).await;
                Err(err)
            }
        }
    }

    async fn maybe_recover(&self, command_id: &str, err: &DebugError) {
        if !err.is_recovery_trigger() {
            return;
        }
        debug!(command_id, error = %err, "failure qualifies for recovery");
        let recovered = self
            .recovery
            .recover(&format!("command {command_id} failed: {err}"))
            .await;
        if !recovered {
            debug!(command_id, "recovery declined or failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::DefaultClassifier;
    use crate::notify::NullSink;
    use cdm_config::{DebuggerSettings, RecoverySettings};
    use cdm_session::HealthMonitor;

    fn executor_without_session() -> RecoveryExecutor {
        let session = Arc::new(CdbSession::new(DebuggerSettings::default()));
        let health = Arc::new(HealthMonitor::new(
            session.clone(),
            Duration::from_secs(30),
        ));
        let recovery = Arc::new(RecoveryOrchestrator::new(
            session.clone(),
            health,
            Arc::new(NullSink),
            RecoverySettings::default(),
        ));
        RecoveryExecutor::new(
            session,
            Arc::new(TimeoutManager::new()),
            recovery,
            Arc::new(DefaultClassifier),
            QueueSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_no_session_surfaces_and_timer_is_cleared() {
        let executor = executor_without_session();
        let cancel = CancellationToken::new();

        let err = executor
            .execute_with_recovery("cmd-1", "version", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::NoSession));
        assert!(executor.timeouts.is_empty());
    }

    #[tokio::test]
    async fn test_classified_timeouts() {
        let executor = executor_without_session();
        assert_eq!(
            executor.classified_timeout("!analyze -v"),
            Duration::from_secs(600)
        );
        assert_eq!(
            executor.classified_timeout("version"),
            Duration::from_secs(120)
        );
    }
}
