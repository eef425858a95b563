//! Running counters for the command pipeline.
//!
//! Updated by the dispatcher on every terminal transition; readable from any
//! thread without locks. Execution time is tracked in milliseconds so the
//! average stays meaningful for fast commands.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    execution_time_ms: AtomicU64,
}

/// Point-in-time snapshot of [`QueueStats`].
#[derive(Clone, Debug, Serialize)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub settled: u64,
    pub avg_execution_ms: u64,
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.execution_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.execution_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        // Only commands that actually ran contribute execution time.
        let ran = completed + failed;
        let total_ms = self.execution_time_ms.load(Ordering::Relaxed);

        QueueStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed,
            failed,
            cancelled,
            settled: completed + failed + cancelled,
            avg_execution_ms: if ran > 0 { total_ms / ran } else { 0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_are_zero() {
        let stats = QueueStats::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.enqueued, 0);
        assert_eq!(snapshot.settled, 0);
        assert_eq!(snapshot.avg_execution_ms, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = QueueStats::new();
        stats.record_enqueued();
        stats.record_enqueued();
        stats.record_enqueued();
        stats.record_completed(Duration::from_millis(100));
        stats.record_failed(Duration::from_millis(300));
        stats.record_cancelled();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.enqueued, 3);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.settled, 3);
        assert_eq!(snapshot.avg_execution_ms, 200);
    }

    #[test]
    fn test_cancelled_does_not_skew_average() {
        let stats = QueueStats::new();
        stats.record_completed(Duration::from_millis(500));
        stats.record_cancelled();
        stats.record_cancelled();
        assert_eq!(stats.snapshot().avg_execution_ms, 500);
    }
}
