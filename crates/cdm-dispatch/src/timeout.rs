//! Per-command timers with start/cancel/extend.
//!
//! Each entry owns a detached waiter task. `extend` replaces the entry but
//! preserves the ORIGINAL callback and start time, so the callback's elapsed
//! argument is always measured from the first `start`.

use cdm_core::DebugError;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Invoked with the elapsed time since the original `start`.
pub type TimeoutCallback = Arc<dyn Fn(Duration) + Send + Sync>;

struct TimeoutEntry {
    token: CancellationToken,
    started_at: Instant,
    callback: TimeoutCallback,
    epoch: u64,
}

pub struct TimeoutManager {
    entries: Arc<DashMap<String, TimeoutEntry>>,
    epochs: AtomicU64,
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutManager {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            epochs: AtomicU64::new(0),
        }
    }

    /// Arm a timer for `id`. An existing timer for the same id is cancelled
    /// and replaced.
    pub fn start(
        &self,
        id: &str,
        duration: Duration,
        callback: TimeoutCallback,
    ) -> Result<(), DebugError> {
        if id.is_empty() {
            return Err(DebugError::InvalidInput("empty timeout id".into()));
        }
        if duration.is_zero() {
            return Err(DebugError::InvalidInput(
                "timeout duration must be positive".into(),
            ));
        }

        self.arm(id.to_string(), Instant::now(), callback, duration);
        Ok(())
    }

    /// Disarm the timer for `id`, if any.
    pub fn cancel(&self, id: &str) {
        if let Some((_, entry)) = self.entries.remove(id) {
            entry.token.cancel();
        }
    }

    /// Replace the timer for `id` with one firing after `additional`, keeping
    /// the original callback and start time.
    pub fn extend(&self, id: &str, additional: Duration) -> Result<(), DebugError> {
        if id.is_empty() {
            return Err(DebugError::InvalidInput("empty timeout id".into()));
        }
        if additional.is_zero() {
            return Err(DebugError::InvalidInput(
                "timeout extension must be positive".into(),
            ));
        }
        let Some((_, old)) = self.entries.remove(id) else {
            return Err(DebugError::InvalidInput(format!(
                "no timeout registered for '{id}'"
            )));
        };
        // The prior waiter observes the cancellation and cleans itself up.
        old.token.cancel();

        self.arm(id.to_string(), old.started_at, old.callback, additional);
        Ok(())
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Disarm everything.
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel(&id);
        }
    }

    fn arm(&self, id: String, started_at: Instant, callback: TimeoutCallback, sleep: Duration) {
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let entry = TimeoutEntry {
            token: token.clone(),
            started_at,
            callback,
            epoch,
        };
        if let Some(old) = self.entries.insert(id.clone(), entry) {
            old.token.cancel();
        }

        let entries = self.entries.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(sleep) => {
                    // Fire only if this waiter still owns the entry.
                    if let Some((_, entry)) = entries.remove_if(&id, |_, e| e.epoch == epoch) {
                        let elapsed = entry.started_at.elapsed();
                        debug!(id, elapsed_ms = elapsed.as_millis() as u64, "timeout fired");
                        (entry.callback)(elapsed);
                    }
                }
            }
        });
    }
}

impl Drop for TimeoutManager {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn counter_callback() -> (TimeoutCallback, Arc<AtomicUsize>, Arc<Mutex<Vec<Duration>>>) {
        let fires = Arc::new(AtomicUsize::new(0));
        let elapsed_log = Arc::new(Mutex::new(Vec::new()));
        let cb_fires = fires.clone();
        let cb_log = elapsed_log.clone();
        let callback: TimeoutCallback = Arc::new(move |elapsed| {
            cb_fires.fetch_add(1, Ordering::SeqCst);
            cb_log.lock().unwrap().push(elapsed);
        });
        (callback, fires, elapsed_log)
    }

    #[tokio::test]
    async fn test_timer_fires_once_and_clears() {
        let manager = TimeoutManager::new();
        let (callback, fires, _) = counter_callback();

        manager
            .start("cmd-1", Duration::from_millis(30), callback)
            .unwrap();
        assert_eq!(manager.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let manager = TimeoutManager::new();
        let (callback, fires, _) = counter_callback();

        manager
            .start("cmd-1", Duration::from_millis(50), callback)
            .unwrap();
        manager.cancel("cmd-1");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_missing_id_is_safe() {
        let manager = TimeoutManager::new();
        manager.cancel("never-started");
    }

    #[tokio::test]
    async fn test_restart_replaces_prior_timer() {
        let manager = TimeoutManager::new();
        let (first_cb, first_fires, _) = counter_callback();
        let (second_cb, second_fires, _) = counter_callback();

        manager
            .start("cmd-1", Duration::from_millis(40), first_cb)
            .unwrap();
        manager
            .start("cmd-1", Duration::from_millis(40), second_cb)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(first_fires.load(Ordering::SeqCst), 0);
        assert_eq!(second_fires.load(Ordering::SeqCst), 1);
    }

    /// A 500 ms timer extended by 200 ms at the 400 ms mark fires once, with
    /// elapsed measured from the original start (~600 ms).
    #[tokio::test]
    async fn test_extend_preserves_original_start() {
        let manager = TimeoutManager::new();
        let (callback, fires, elapsed_log) = counter_callback();

        manager
            .start("cmd-1", Duration::from_millis(500), callback)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        manager.extend("cmd-1", Duration::from_millis(200)).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        let elapsed = elapsed_log.lock().unwrap()[0];
        assert!(
            elapsed >= Duration::from_millis(550) && elapsed <= Duration::from_millis(900),
            "elapsed-from-origin was {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_repeated_extends_accumulate() {
        let manager = TimeoutManager::new();
        let (callback, fires, _) = counter_callback();

        manager
            .start("cmd-1", Duration::from_millis(60), callback)
            .unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            manager.extend("cmd-1", Duration::from_millis(60)).unwrap();
        }
        // Three extends with no expiry in between behave like one longer
        // timer; nothing fires until the last extension elapses.
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected() {
        let manager = TimeoutManager::new();
        let (callback, _, _) = counter_callback();

        assert!(matches!(
            manager.start("", Duration::from_secs(1), callback.clone()),
            Err(DebugError::InvalidInput(_))
        ));
        assert!(matches!(
            manager.start("cmd-1", Duration::ZERO, callback.clone()),
            Err(DebugError::InvalidInput(_))
        ));
        assert!(matches!(
            manager.extend("cmd-1", Duration::from_secs(1)),
            Err(DebugError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_many_timers_fire_independently() {
        let manager = Arc::new(TimeoutManager::new());
        let fired = Arc::new(AtomicUsize::new(0));

        for i in 0..20u64 {
            let fired = fired.clone();
            let callback: TimeoutCallback = Arc::new(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            manager
                .start(&format!("cmd-{i}"), Duration::from_millis(20 + i), callback)
                .unwrap();
        }
        // Cancel half before they can fire.
        for i in (0..20u64).step_by(2) {
            manager.cancel(&format!("cmd-{i}"));
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let manager = TimeoutManager::new();
        for i in 0..5 {
            let (callback, _, _) = counter_callback();
            manager
                .start(&format!("cmd-{i}"), Duration::from_secs(60), callback)
                .unwrap();
        }
        assert_eq!(manager.len(), 5);
        manager.cancel_all();
        assert!(manager.is_empty());
    }
}
