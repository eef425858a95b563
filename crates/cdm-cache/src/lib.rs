//! In-process result cache: concurrent map with TTL expiry, LRU +
//! access-frequency pressure eviction, and running statistics.
//!
//! Entries live in a sharded concurrent map; per-entry mutable fields are
//! atomics so reads never take a map-wide lock. Eviction walks a snapshot
//! ordering and removes conditionally, so it is safe against concurrent
//! removes.

mod estimate;

pub use estimate::{ByteSized, ENTRY_BASE_OVERHEAD};

use cdm_config::CacheSettings;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// After a pressure cycle, usage is brought down to this fraction of the
/// memory budget.
const POST_CLEANUP_TARGET_RATIO: f64 = 0.6;

struct CacheEntry<V> {
    value: V,
    size_bytes: usize,
    created_ms: u64,
    expires_ms: u64,
    last_accessed_ms: AtomicU64,
    access_count: AtomicU64,
}

struct CacheInner<V> {
    entries: DashMap<String, CacheEntry<V>>,
    settings: CacheSettings,
    epoch: Instant,
    total_bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: usize,
    pub total_accesses: u64,
    pub avg_access_count: f64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub hit_ratio: f64,
    pub oldest_age_secs: f64,
    pub newest_age_secs: f64,
    pub avg_age_secs: f64,
    pub memory_pressure_bytes: usize,
    pub utilization_pct: f64,
}

pub struct ResultCache<V> {
    inner: Arc<CacheInner<V>>,
    cleanup: CancellationToken,
}

impl<V> Drop for ResultCache<V> {
    fn drop(&mut self) {
        self.cleanup.cancel();
    }
}

impl<V: ByteSized + Clone + Send + Sync + 'static> ResultCache<V> {
    /// Build the cache and start its periodic cleanup task. Must be called
    /// from within a tokio runtime.
    pub fn new(settings: CacheSettings) -> Self {
        let inner = Arc::new(CacheInner {
            entries: DashMap::new(),
            epoch: Instant::now(),
            total_bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            settings,
        });

        let cleanup = CancellationToken::new();
        let task_inner = inner.clone();
        let task_token = cleanup.clone();
        let interval = task_inner.settings.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        task_inner.run_cleanup_cycle();
                    }
                }
            }
        });

        Self { inner, cleanup }
    }

    /// Look up `key`. An expired entry counts as a miss and is removed on
    /// observation; a hit refreshes the entry's access bookkeeping.
    pub fn try_get(&self, key: &str) -> Option<V> {
        self.inner.try_get(key)
    }

    /// Insert or replace `key`. Triggers a pressure check.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner.set(key, value, ttl);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.remove(key)
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
        self.inner.total_bytes.store(0, Ordering::SeqCst);
    }

    /// Whether `key` is present and unexpired; strips an expired entry on
    /// observation without counting a hit or a miss.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn total_size_bytes(&self) -> usize {
        self.inner.total_bytes.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.inner.statistics()
    }

    /// One maintenance pass: strip expired entries (bounded per cycle), then
    /// evict under memory pressure. The periodic task calls this; tests may
    /// drive it directly.
    pub fn run_cleanup_cycle(&self) -> usize {
        self.inner.run_cleanup_cycle()
    }
}

impl<V: ByteSized + Clone + Send + Sync + 'static> CacheInner<V> {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn try_get(&self, key: &str) -> Option<V> {
        let now = self.now_ms();
        let hit = match self.entries.get(key) {
            None => None,
            Some(entry) if entry.expires_ms <= now => None,
            Some(entry) => {
                entry.last_accessed_ms.store(now, Ordering::SeqCst);
                entry.access_count.fetch_add(1, Ordering::SeqCst);
                Some(entry.value.clone())
            }
        };
        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                Some(value)
            }
            None => {
                self.remove_if_expired(key, now);
                self.misses.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.settings.default_ttl());
        let now = self.now_ms();
        let size_bytes = value.size_bytes() + ENTRY_BASE_OVERHEAD;
        let entry = CacheEntry {
            value,
            size_bytes,
            created_ms: now,
            // expires-at strictly after created-at, even for degenerate TTLs
            expires_ms: now + (ttl.as_millis() as u64).max(1),
            last_accessed_ms: AtomicU64::new(now),
            access_count: AtomicU64::new(0),
        };

        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            self.sub_bytes(old.size_bytes);
        }
        self.total_bytes.fetch_add(size_bytes, Ordering::SeqCst);
        self.sets.fetch_add(1, Ordering::SeqCst);

        self.run_pressure_check();
    }

    fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.sub_bytes(entry.size_bytes);
                true
            }
            None => false,
        }
    }

    fn contains(&self, key: &str) -> bool {
        let now = self.now_ms();
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_ms <= now,
            None => return false,
        };
        if expired {
            self.remove_if_expired(key, now);
            return false;
        }
        true
    }

    fn remove_if_expired(&self, key: &str, now: u64) {
        if let Some((_, entry)) = self
            .entries
            .remove_if(key, |_, entry| entry.expires_ms <= now)
        {
            self.sub_bytes(entry.size_bytes);
        }
    }

    fn sub_bytes(&self, size: usize) {
        let _ = self
            .total_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(size))
            });
    }

    fn run_cleanup_cycle(&self) -> usize {
        let now = self.now_ms();
        let budget = self.settings.max_evict_per_cycle;

        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_ms <= now)
            .map(|entry| entry.key().clone())
            .take(budget)
            .collect();

        let mut removed = 0;
        for key in expired_keys {
            if let Some((_, entry)) = self
                .entries
                .remove_if(&key, |_, entry| entry.expires_ms <= now)
            {
                self.sub_bytes(entry.size_bytes);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "cache cleanup removed expired entries");
        }

        self.run_pressure_check();
        removed
    }

    fn run_pressure_check(&self) {
        let max = self.settings.max_memory_bytes;
        let threshold = (max as f64 * self.settings.pressure_threshold) as usize;
        if self.total_bytes.load(Ordering::SeqCst) <= threshold {
            return;
        }
        let target = (max as f64 * POST_CLEANUP_TARGET_RATIO) as usize;
        let evicted = self.evict_down_to(target, self.settings.max_evict_per_cycle);
        if evicted > 0 {
            debug!(
                evicted,
                used = self.total_bytes.load(Ordering::SeqCst),
                target,
                "cache pressure eviction"
            );
        }
    }

    /// Evict entries in LRU order (access-count tie-break) until usage drops
    /// to `target` or the per-cycle budget is spent.
    fn evict_down_to(&self, target: usize, budget: usize) -> usize {
        let snapshot: Vec<(String, u64, u64)> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.last_accessed_ms.load(Ordering::SeqCst),
                    entry.access_count.load(Ordering::SeqCst),
                )
            })
            .collect();

        let ordered = eviction_order(snapshot);

        let mut evicted = 0;
        for (key, last_accessed, _) in ordered {
            if evicted >= budget || self.total_bytes.load(Ordering::SeqCst) <= target {
                break;
            }
            // Skip entries touched since the snapshot was taken.
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, entry| {
                entry.last_accessed_ms.load(Ordering::SeqCst) == last_accessed
            }) {
                self.sub_bytes(entry.size_bytes);
                evicted += 1;
            }
        }
        evicted
    }

    fn statistics(&self) -> CacheStatistics {
        let now = self.now_ms();
        let mut total_entries = 0usize;
        let mut expired_entries = 0usize;
        let mut total_accesses = 0u64;
        let mut oldest_ms = 0u64;
        let mut newest_ms = u64::MAX;
        let mut age_sum_ms = 0u64;

        for entry in self.entries.iter() {
            total_entries += 1;
            if entry.expires_ms <= now {
                expired_entries += 1;
            }
            total_accesses += entry.access_count.load(Ordering::SeqCst);
            let age = now.saturating_sub(entry.created_ms);
            oldest_ms = oldest_ms.max(age);
            newest_ms = newest_ms.min(age);
            age_sum_ms += age;
        }

        let hits = self.hits.load(Ordering::SeqCst);
        let misses = self.misses.load(Ordering::SeqCst);
        let lookups = hits + misses;
        let total_size_bytes = self.total_bytes.load(Ordering::SeqCst);
        let max = self.settings.max_memory_bytes;

        CacheStatistics {
            total_entries,
            expired_entries,
            total_size_bytes,
            total_accesses,
            avg_access_count: if total_entries > 0 {
                total_accesses as f64 / total_entries as f64
            } else {
                0.0
            },
            hits,
            misses,
            sets: self.sets.load(Ordering::SeqCst),
            hit_ratio: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            oldest_age_secs: oldest_ms as f64 / 1000.0,
            newest_age_secs: if newest_ms == u64::MAX {
                0.0
            } else {
                newest_ms as f64 / 1000.0
            },
            avg_age_secs: if total_entries > 0 {
                age_sum_ms as f64 / total_entries as f64 / 1000.0
            } else {
                0.0
            },
            memory_pressure_bytes: total_size_bytes.saturating_sub(max),
            utilization_pct: total_size_bytes as f64 / max as f64 * 100.0,
        }
    }
}

/// Ascending `last_accessed`, ties broken by ascending `access_count`:
/// least-recently, then least-frequently, used first.
fn eviction_order(mut snapshot: Vec<(String, u64, u64)>) -> Vec<(String, u64, u64)> {
    snapshot.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
    snapshot
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
