//! TTL cache for generated audit reports.
//!
//! Entries live in a bounded LRU moka cache. Freshness is judged against the
//! injected clock on every read, so an expired entry is never served even if
//! moka has not evicted it yet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::ops::compute::{CompResult, Op};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::clock::{duration_ms, Clock};

/// Default time-to-live for a cached report (6 hours).
pub const DEFAULT_REPORT_TTL: Duration = Duration::from_secs(6 * 3600);

/// Default number of guilds kept in the cache.
pub const DEFAULT_REPORT_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    stored_at: u64,
}

/// Internal statistics tracker.
#[derive(Clone, Default)]
struct StatsTracker {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl StatsTracker {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Per-guild report cache with lazy expiry.
#[derive(Clone)]
pub struct ReportCache<V> {
    entries: Cache<String, CacheEntry<V>>,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    stats_tracker: StatsTracker,
}

impl<V> ReportCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(DEFAULT_REPORT_TTL, DEFAULT_REPORT_CAPACITY, clock)
    }

    pub fn with_config(ttl: Duration, capacity: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            // LRU admits every insert; TinyLFU may reject a cold key when full
            entries: Cache::builder()
                .max_capacity(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            ttl_ms: duration_ms(ttl),
            clock,
            stats_tracker: StatsTracker::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: u64) -> bool {
        now.saturating_sub(entry.stored_at) < self.ttl_ms
    }

    /// Remove the entry only if it is still expired under the key's lock, so
    /// a concurrent insert is never discarded.
    fn remove_if_expired(&self, guild_id: &str, now: u64) -> bool {
        let result = self
            .entries
            .entry_by_ref(guild_id)
            .and_compute_with(|current| match current {
                Some(entry) if !self.is_fresh(entry.value(), now) => Op::Remove,
                _ => Op::Nop,
            });

        matches!(result, CompResult::Removed(_))
    }

    /// Cached payload for a guild, if younger than the TTL.
    ///
    /// An expired entry is evicted and reported as a miss.
    pub fn get(&self, guild_id: &str) -> Option<V> {
        let now = self.clock.now_ms();

        match self.entries.get(guild_id) {
            Some(entry) if self.is_fresh(&entry, now) => {
                self.stats_tracker.record_hit();
                Some(entry.payload)
            }
            Some(_) => {
                self.remove_if_expired(guild_id, now);
                self.stats_tracker.record_miss();
                None
            }
            None => {
                self.stats_tracker.record_miss();
                None
            }
        }
    }

    /// Store a payload, replacing any previous entry.
    pub fn insert(&self, guild_id: &str, payload: V) {
        let entry = CacheEntry {
            payload,
            stored_at: self.clock.now_ms(),
        };
        self.entries.insert(guild_id.to_string(), entry);
    }

    pub fn invalidate(&self, guild_id: &str) {
        self.entries.invalidate(guild_id);
    }

    /// Evict every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_ms();

        // Collect keys to evict
        let expired: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| !self.is_fresh(entry, now))
            .map(|(key, _)| key)
            .collect();

        expired
            .iter()
            .filter(|key| self.remove_if_expired(key.as_str(), now))
            .count()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.stats_tracker.hits()
    }

    pub fn misses(&self) -> u64 {
        self.stats_tracker.misses()
    }

    /// Hit rate (0.0 to 1.0) over all reads so far.
    pub fn hit_rate(&self) -> f64 {
        self.stats_tracker.hit_rate()
    }
}
