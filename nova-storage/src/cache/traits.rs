//! Store traits for artifacts, claims and rate-limit counters.
//!
//! Every backend implements all three so one shared store can coordinate
//! every process instance. The operations that need atomicity
//! (`try_claim`, `increment_and_check`) must be a single indivisible step
//! inside the backend, never a read followed by a separate write issued by
//! the caller.

use std::time::Duration;

use async_trait::async_trait;
use nova_core::{ArtifactKey, CacheEntry, ClaimMarker, ClaimStatus, CounterKey, NovaResult, Timestamp};

/// Persistent key -> artifact store.
///
/// # Implementation Requirements
///
/// - `upsert` must leave at most one entry per [`ArtifactKey`] and keep the
///   `entry_id` of the entry it replaces
/// - deletions must be idempotent: deleting a missing entry is `Ok`
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch the live entry for `key`.
    async fn get(&self, key: &ArtifactKey) -> NovaResult<Option<CacheEntry>>;

    /// Insert or replace the entry for `entry.key`, returning what was stored.
    async fn upsert(&self, entry: CacheEntry) -> NovaResult<CacheEntry>;

    /// Delete one entry. Returns whether something was removed.
    async fn delete(&self, key: &ArtifactKey) -> NovaResult<bool>;

    /// Delete every entry for a topic, across users and variants.
    async fn delete_topic(&self, topic_id: &str) -> NovaResult<u64>;

    /// Delete at most `limit` entries whose `created_at` is strictly before
    /// `cutoff`. Returns how many were removed by this call.
    async fn delete_older_than(&self, cutoff: Timestamp, limit: usize) -> NovaResult<u64>;

    /// Number of live entries.
    async fn count(&self) -> NovaResult<u64>;
}

/// Short-lived generation claims.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically grant a claim on `key` unless an unexpired one is held.
    ///
    /// Never returns [`ClaimStatus::Unguarded`]; that outcome is reserved for
    /// callers that could not reach the store at all.
    async fn try_claim(
        &self,
        key: &ArtifactKey,
        ttl: Duration,
        now: Timestamp,
    ) -> NovaResult<ClaimStatus>;

    /// Remove a claim if it is still held under `marker.token`.
    async fn release(&self, marker: &ClaimMarker) -> NovaResult<bool>;

    /// Drop every claim that has expired by `now`.
    async fn purge_expired_claims(&self, now: Timestamp) -> NovaResult<u64>;
}

/// Result of one atomic increment-and-compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterCheck {
    /// Post-increment count is within the limit.
    pub allowed: bool,
    /// Post-increment count for the current window.
    pub count: u32,
    /// When the current window closes.
    pub window_end: Timestamp,
}

/// Fixed-window rate-limit counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one call against `key` and report whether it fits in `limit`.
    ///
    /// Opens a new window at `now` when the previous one has elapsed.
    async fn increment_and_check(
        &self,
        key: &CounterKey,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> NovaResult<CounterCheck>;

    /// Drop every counter whose window has closed by `now`. The next call
    /// for that key opens a fresh window either way.
    async fn purge_expired_counters(&self, now: Timestamp) -> NovaResult<u64>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, including reads degraded by store errors.
    pub misses: u64,
    /// Reads that failed against the store and were served as misses.
    pub read_failures: u64,
    /// Successful writes.
    pub writes: u64,
    /// Writes that could not be persisted.
    pub write_failures: u64,
    /// Entries currently stored, if the store could be asked.
    pub entry_count: Option<u64>,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
