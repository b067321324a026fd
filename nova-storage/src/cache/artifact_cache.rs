//! Degrading artifact cache facade.
//!
//! Wraps a store and turns its failures into the safe fallback for each
//! path: a failed read is a miss, a failed write still returns the entry,
//! and an unreachable claim store lets the caller generate unguarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nova_core::{ArtifactKey, CacheEntry, ClaimStatus, GeneratedArtifact, NovaResult, Timestamp};

use super::traits::{ArtifactStore, CacheStats, ClaimStore};

/// Configuration for the artifact cache.
#[derive(Debug, Clone)]
pub struct ArtifactCacheConfig {
    /// How long a generation claim stays exclusive before another caller
    /// may take over the key.
    pub claim_ttl: Duration,
}

impl Default for ArtifactCacheConfig {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::from_secs(90),
        }
    }
}

impl ArtifactCacheConfig {
    /// Set the claim TTL.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    read_failures: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

/// Artifact cache over any store that holds both entries and claims.
pub struct ArtifactCache<S>
where
    S: ArtifactStore + ClaimStore,
{
    store: Arc<S>,
    config: ArtifactCacheConfig,
    counters: CacheCounters,
}

impl<S> ArtifactCache<S>
where
    S: ArtifactStore + ClaimStore,
{
    pub fn new(store: Arc<S>, config: ArtifactCacheConfig) -> Self {
        Self {
            store,
            config,
            counters: CacheCounters::default(),
        }
    }

    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, ArtifactCacheConfig::default())
    }

    pub fn config(&self) -> &ArtifactCacheConfig {
        &self.config
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Look up the entry for `key`. Store failures are reported as a miss.
    pub async fn get(&self, key: &ArtifactKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(Some(entry)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Artifact cache hit");
                Some(entry)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Artifact cache miss");
                None
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Artifact cache read failed; treating as miss");
                None
            }
        }
    }

    /// Store a freshly generated artifact, replacing any previous entry.
    ///
    /// Always returns the entry: if it cannot be persisted the failure is
    /// logged and the caller still gets the payload it paid for.
    pub async fn put(&self, key: &ArtifactKey, artifact: GeneratedArtifact) -> CacheEntry {
        self.put_at(key, artifact, Utc::now()).await
    }

    /// [`put`](Self::put) with an explicit creation time.
    pub async fn put_at(
        &self,
        key: &ArtifactKey,
        artifact: GeneratedArtifact,
        created_at: Timestamp,
    ) -> CacheEntry {
        let entry = CacheEntry::new(key.clone(), artifact, created_at);
        match self.store.upsert(entry.clone()).await {
            Ok(stored) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, entry_id = %stored.entry_id, "Artifact cached");
                stored
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(key = %key, error = %e, "Failed to persist artifact; returning it uncached");
                entry
            }
        }
    }

    /// Try to become the single generator for `key`.
    pub async fn claim(&self, key: &ArtifactKey) -> ClaimStatus {
        self.claim_at(key, Utc::now()).await
    }

    /// [`claim`](Self::claim) evaluated at `now`.
    pub async fn claim_at(&self, key: &ArtifactKey, now: Timestamp) -> ClaimStatus {
        match self.store.try_claim(key, self.config.claim_ttl, now).await {
            Ok(status) => {
                if let ClaimStatus::AlreadyInFlight { expires_at } = &status {
                    tracing::debug!(key = %key, %expires_at, "Generation already in flight");
                }
                status
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Claim store unavailable; generating unguarded");
                ClaimStatus::Unguarded
            }
        }
    }

    /// Give up a claim early. No-op for anything but a granted claim.
    pub async fn release(&self, status: &ClaimStatus) {
        let Some(marker) = status.marker() else {
            return;
        };
        match self.store.release(marker).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(key = %marker.key, "Claim already expired or taken over");
            }
            Err(e) => {
                // The claim expires on its own.
                tracing::warn!(key = %marker.key, error = %e, "Failed to release claim");
            }
        }
    }

    /// Remove one entry on behalf of an administrator.
    pub async fn invalidate(&self, key: &ArtifactKey) -> NovaResult<bool> {
        let removed = self.store.delete(key).await?;
        tracing::info!(key = %key, removed, "Artifact invalidated");
        Ok(removed)
    }

    /// Remove every entry for a topic on behalf of an administrator.
    pub async fn invalidate_topic(&self, topic_id: &str) -> NovaResult<u64> {
        let removed = self.store.delete_topic(topic_id).await?;
        tracing::info!(topic_id, removed, "Topic artifacts invalidated");
        Ok(removed)
    }

    /// Snapshot of cache usage.
    pub async fn stats(&self) -> CacheStats {
        let entry_count = match self.store.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::debug!(error = %e, "Could not count cache entries");
                None
            }
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            entry_count,
        }
    }
}
