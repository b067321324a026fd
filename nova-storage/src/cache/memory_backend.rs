//! In-memory store backed by `DashMap`.
//!
//! Atomic claims and counters come from DashMap's entry API, which holds
//! the shard lock for the key while the closure runs. Only coordinates the
//! current process; multi-instance deployments need a shared backend.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nova_core::{
    to_offset, ArtifactKey, CacheEntry, ClaimMarker, ClaimStatus, CounterKey, NovaResult,
    RateLimitCounter, Timestamp,
};

use super::traits::{ArtifactStore, ClaimStore, CounterCheck, CounterStore};

/// Process-local implementation of every store trait.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<ArtifactKey, CacheEntry>,
    claims: DashMap<ArtifactKey, ClaimMarker>,
    counters: DashMap<CounterKey, RateLimitCounter>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claim markers currently held, expired or not.
    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Snapshot of a counter, for inspection in tests and tooling.
    pub fn counter(&self, key: &CounterKey) -> Option<RateLimitCounter> {
        self.counters.get(key).map(|c| c.clone())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn get(&self, key: &ArtifactKey) -> NovaResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    async fn upsert(&self, mut entry: CacheEntry) -> NovaResult<CacheEntry> {
        match self.entries.entry(entry.key.clone()) {
            Entry::Occupied(mut occupied) => {
                entry.entry_id = occupied.get().entry_id;
                occupied.insert(entry.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }
        Ok(entry)
    }

    async fn delete(&self, key: &ArtifactKey) -> NovaResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_topic(&self, topic_id: &str) -> NovaResult<u64> {
        let keys: Vec<ArtifactKey> = self
            .entries
            .iter()
            .filter(|e| e.key().topic_id() == topic_id)
            .map(|e| e.key().clone())
            .collect();

        let mut deleted = 0u64;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_older_than(&self, cutoff: Timestamp, limit: usize) -> NovaResult<u64> {
        let keys: Vec<ArtifactKey> = self
            .entries
            .iter()
            .filter(|e| e.value().is_older_than(cutoff))
            .take(limit)
            .map(|e| e.key().clone())
            .collect();

        let mut deleted = 0u64;
        for key in keys {
            // Re-check under the shard lock: the entry may have been refreshed.
            if self
                .entries
                .remove_if(&key, |_, entry| entry.is_older_than(cutoff))
                .is_some()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn count(&self) -> NovaResult<u64> {
        Ok(self.entries.len() as u64)
    }
}

#[async_trait]
impl ClaimStore for InMemoryStore {
    async fn try_claim(
        &self,
        key: &ArtifactKey,
        ttl: Duration,
        now: Timestamp,
    ) -> NovaResult<ClaimStatus> {
        let expires_at = now + to_offset(ttl);
        let status = match self.claims.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    let marker = ClaimMarker::new(key.clone(), expires_at);
                    occupied.insert(marker.clone());
                    ClaimStatus::Granted(marker)
                } else {
                    ClaimStatus::AlreadyInFlight {
                        expires_at: occupied.get().expires_at,
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let marker = ClaimMarker::new(key.clone(), expires_at);
                vacant.insert(marker.clone());
                ClaimStatus::Granted(marker)
            }
        };
        Ok(status)
    }

    async fn release(&self, marker: &ClaimMarker) -> NovaResult<bool> {
        Ok(self
            .claims
            .remove_if(&marker.key, |_, held| held.token == marker.token)
            .is_some())
    }

    async fn purge_expired_claims(&self, now: Timestamp) -> NovaResult<u64> {
        let expired: Vec<ArtifactKey> = self
            .claims
            .iter()
            .filter(|c| c.value().is_expired(now))
            .map(|c| c.key().clone())
            .collect();

        let mut purged = 0u64;
        for key in expired {
            if self
                .claims
                .remove_if(&key, |_, held| held.is_expired(now))
                .is_some()
            {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn increment_and_check(
        &self,
        key: &CounterKey,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> NovaResult<CounterCheck> {
        let window = to_offset(window);
        let mut counter = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| RateLimitCounter::open(key.clone(), now, window));
        let count = counter.record(now, window);
        Ok(CounterCheck {
            allowed: count <= limit,
            count,
            window_end: counter.window_end,
        })
    }

    async fn purge_expired_counters(&self, now: Timestamp) -> NovaResult<u64> {
        let expired: Vec<CounterKey> = self
            .counters
            .iter()
            .filter(|c| c.value().is_expired(now))
            .map(|c| c.key().clone())
            .collect();

        let mut purged = 0u64;
        for key in expired {
            if self
                .counters
                .remove_if(&key, |_, counter| counter.is_expired(now))
                .is_some()
            {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use nova_core::GeneratedArtifact;
    use std::sync::Arc;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn entry(key: &ArtifactKey, payload: &str, created_at: Timestamp) -> CacheEntry {
        CacheEntry::new(
            key.clone(),
            GeneratedArtifact::new(serde_json::json!(payload)),
            created_at,
        )
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_entry_and_original_id() {
        let store = InMemoryStore::new();
        let key = ArtifactKey::for_user("t", "u", "v");

        let first = store.upsert(entry(&key, "one", at(0))).await.unwrap();
        let second = store.upsert(entry(&key, "two", at(5))).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(second.entry_id, first.entry_id);
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.payload, serde_json::json!("two"));
        assert_eq!(stored.created_at, at(5));
    }

    #[tokio::test]
    async fn test_delete_older_than_respects_limit_and_boundary() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            let key = ArtifactKey::shared(format!("old-{i}"), "v");
            store.upsert(entry(&key, "x", at(0))).await.unwrap();
        }
        let edge = ArtifactKey::shared("edge", "v");
        store.upsert(entry(&edge, "x", at(10))).await.unwrap();

        assert_eq!(store.delete_older_than(at(10), 3).await.unwrap(), 3);
        assert_eq!(store.delete_older_than(at(10), 3).await.unwrap(), 2);
        assert_eq!(store.delete_older_than(at(10), 3).await.unwrap(), 0);
        assert!(store.get(&edge).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_topic_only_hits_that_topic() {
        let store = InMemoryStore::new();
        for user in ["a", "b"] {
            let key = ArtifactKey::for_user("t1", user, "v");
            store.upsert(entry(&key, "x", at(0))).await.unwrap();
        }
        let other = ArtifactKey::shared("t2", "v");
        store.upsert(entry(&other, "x", at(0))).await.unwrap();

        assert_eq!(store.delete_topic("t1").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(!store.delete(&ArtifactKey::shared("t1", "v")).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_expiry() {
        let store = InMemoryStore::new();
        let key = ArtifactKey::shared("t", "v");
        let ttl = Duration::from_secs(30);

        let first = store.try_claim(&key, ttl, at(0)).await.unwrap();
        assert!(matches!(first, ClaimStatus::Granted(_)));

        let second = store.try_claim(&key, ttl, at(10)).await.unwrap();
        assert_eq!(second, ClaimStatus::AlreadyInFlight { expires_at: at(30) });

        let after_expiry = store.try_claim(&key, ttl, at(30)).await.unwrap();
        assert!(matches!(after_expiry, ClaimStatus::Granted(_)));
    }

    #[tokio::test]
    async fn test_release_requires_matching_token() {
        let store = InMemoryStore::new();
        let key = ArtifactKey::shared("t", "v");
        let ttl = Duration::from_secs(30);

        let stale = match store.try_claim(&key, ttl, at(0)).await.unwrap() {
            ClaimStatus::Granted(marker) => marker,
            other => panic!("expected grant, got {other:?}"),
        };
        // Expired and re-granted to someone else.
        let current = store.try_claim(&key, ttl, at(40)).await.unwrap();
        assert!(matches!(current, ClaimStatus::Granted(_)));

        assert!(!store.release(&stale).await.unwrap());
        assert_eq!(store.claim_count(), 1);

        let current = current.marker().cloned().unwrap();
        assert!(store.release(&current).await.unwrap());
        assert_eq!(store.claim_count(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired_claims() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(30);
        store.try_claim(&ArtifactKey::shared("a", "v"), ttl, at(0)).await.unwrap();
        store.try_claim(&ArtifactKey::shared("b", "v"), ttl, at(20)).await.unwrap();

        assert_eq!(store.purge_expired_claims(at(35)).await.unwrap(), 1);
        assert_eq!(store.claim_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_grant_exactly_one() {
        let store = Arc::new(InMemoryStore::new());
        let key = ArtifactKey::shared("hot", "v");
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.try_claim(&key, Duration::from_secs(30), at(0)).await.unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ClaimStatus::Granted(_)) {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn test_counter_fixed_window() {
        let store = InMemoryStore::new();
        let key = CounterKey::new("u", "generate");
        let window = Duration::from_secs(60);

        for expected in 1..=3 {
            let check = store.increment_and_check(&key, 3, window, at(1)).await.unwrap();
            assert!(check.allowed);
            assert_eq!(check.count, expected);
        }
        let denied = store.increment_and_check(&key, 3, window, at(2)).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.window_end, at(61));

        let fresh = store.increment_and_check(&key, 3, window, at(61)).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn test_purge_expired_counters_drops_closed_windows() {
        let store = InMemoryStore::new();
        let minute = Duration::from_secs(60);
        let hour = Duration::from_secs(3_600);
        let short = CounterKey::new("u", "generate");
        let long = CounterKey::new("u", "visual");
        store.increment_and_check(&short, 3, minute, at(0)).await.unwrap();
        store.increment_and_check(&long, 3, hour, at(0)).await.unwrap();

        assert_eq!(store.purge_expired_counters(at(59)).await.unwrap(), 0);
        assert_eq!(store.purge_expired_counters(at(60)).await.unwrap(), 1);
        assert_eq!(store.counters.len(), 1);

        // The long window keeps its count across the sweep.
        let check = store.increment_and_check(&long, 3, hour, at(61)).await.unwrap();
        assert_eq!(check.count, 2);
        let fresh = store.increment_and_check(&short, 3, minute, at(61)).await.unwrap();
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_never_exceed_budget() {
        let store = Arc::new(InMemoryStore::new());
        let key = CounterKey::new("u", "generate");
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .increment_and_check(&key, 10, Duration::from_secs(60), at(0))
                    .await
                    .unwrap()
                    .allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
        assert_eq!(store.counter(&key).unwrap().count, 50);
    }
}
