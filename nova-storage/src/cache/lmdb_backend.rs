//! LMDB-backed store for artifacts, claims and rate-limit counters.
//!
//! Uses the heed crate (Rust bindings for LMDB) so cached artifacts survive
//! restarts and every process mapping the same environment shares one set
//! of claims and counters.
//!
//! # Atomicity
//!
//! LMDB allows a single writer at a time across all processes sharing the
//! environment. Claims and counters are read and rewritten inside one write
//! transaction, which makes insert-if-absent and increment-and-compare
//! indivisible without any extra locking.
//!
//! # Layout
//!
//! Three named databases, keyed by [`StoreKey`] encodings:
//! - `artifacts`: JSON-encoded [`CacheEntry`]
//! - `claims`: `[expires_at millis: i64 LE][token: 16 bytes]`
//! - `counters`: `[window_start millis: i64 LE][window_end millis: i64 LE][count: u32 LE]`
//!
//! Claim and counter records that fail to decode are treated as absent:
//! the next claim or increment overwrites them and the sweep purges them.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use nova_core::{
    to_offset, ArtifactKey, CacheEntry, ClaimMarker, ClaimStatus, CounterKey, NovaError, NovaResult,
    RateLimitCounter, StorageError, Timestamp,
};
use uuid::Uuid;

use super::store_key::{topic_prefix, StoreKey};
use super::traits::{ArtifactStore, ClaimStore, CounterCheck, CounterStore};

const CLAIM_RECORD_LEN: usize = 24;
const COUNTER_RECORD_LEN: usize = 20;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        LmdbStoreError::Transaction(e.to_string())
    }
}

/// Convert LmdbStoreError to NovaError.
impl From<LmdbStoreError> for NovaError {
    fn from(e: LmdbStoreError) -> Self {
        let storage = match e {
            LmdbStoreError::Serialization(reason) => StorageError::Serialization { reason },
            LmdbStoreError::Deserialization(reason) => StorageError::Corrupt {
                key: "lmdb".to_string(),
                reason,
            },
            other => StorageError::Unavailable {
                reason: other.to_string(),
            },
        };
        NovaError::Storage(storage)
    }
}

/// LMDB-backed implementation of every store trait.
///
/// # Example
///
/// ```ignore
/// use nova_storage::{ArtifactCache, ArtifactCacheConfig, LmdbStore};
///
/// let store = Arc::new(LmdbStore::open("/var/lib/nova/cache", 256)?);
/// let cache = ArtifactCache::new(store, ArtifactCacheConfig::default());
/// ```
pub struct LmdbStore {
    env: Env,
    artifacts: Database<Bytes, Bytes>,
    claims: Database<Bytes, Bytes>,
    counters: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) the store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and the files are
        // not modified by anything other than LMDB itself.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let artifacts: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("artifacts"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let claims: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("claims"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let counters: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("counters"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB store");

        Ok(Self {
            env,
            artifacts,
            claims,
            counters,
        })
    }

    /// Keys of entries matching `pred`, at most `limit` of them.
    fn scan_artifacts<F>(&self, limit: usize, pred: F) -> Result<Vec<Vec<u8>>, LmdbStoreError>
    where
        F: Fn(&[u8], &CacheEntry) -> bool,
    {
        let rtxn = self.env.read_txn()?;
        let mut keys = Vec::new();
        for result in self.artifacts.iter(&rtxn)? {
            if keys.len() >= limit {
                break;
            }
            let (key, bytes) = result?;
            match decode_entry(bytes) {
                Ok(entry) if pred(key, &entry) => keys.push(key.to_vec()),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable artifact record");
                }
            }
        }
        Ok(keys)
    }
}

fn decode_entry(bytes: &[u8]) -> Result<CacheEntry, LmdbStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Deserialization(e.to_string()))
}

fn millis_to_timestamp(millis: i64) -> Result<Timestamp, LmdbStoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| LmdbStoreError::Deserialization(format!("timestamp out of range: {millis}")))
}

fn encode_claim(marker: &ClaimMarker) -> [u8; CLAIM_RECORD_LEN] {
    let mut bytes = [0u8; CLAIM_RECORD_LEN];
    bytes[0..8].copy_from_slice(&marker.expires_at.timestamp_millis().to_le_bytes());
    bytes[8..24].copy_from_slice(marker.token.as_bytes());
    bytes
}

/// Returns `(expires_at, token)`.
fn decode_claim(bytes: &[u8]) -> Result<(Timestamp, Uuid), LmdbStoreError> {
    if bytes.len() != CLAIM_RECORD_LEN {
        return Err(LmdbStoreError::Deserialization(format!(
            "claim record has {} bytes",
            bytes.len()
        )));
    }
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&bytes[0..8]);
    let token = Uuid::from_slice(&bytes[8..24])
        .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
    Ok((millis_to_timestamp(i64::from_le_bytes(millis))?, token))
}

fn encode_counter(counter: &RateLimitCounter) -> [u8; COUNTER_RECORD_LEN] {
    let mut bytes = [0u8; COUNTER_RECORD_LEN];
    bytes[0..8].copy_from_slice(&counter.window_start.timestamp_millis().to_le_bytes());
    bytes[8..16].copy_from_slice(&counter.window_end.timestamp_millis().to_le_bytes());
    bytes[16..20].copy_from_slice(&counter.count.to_le_bytes());
    bytes
}

fn decode_counter(key: &CounterKey, bytes: &[u8]) -> Result<RateLimitCounter, LmdbStoreError> {
    if bytes.len() != COUNTER_RECORD_LEN {
        return Err(LmdbStoreError::Deserialization(format!(
            "counter record has {} bytes",
            bytes.len()
        )));
    }
    let mut start = [0u8; 8];
    start.copy_from_slice(&bytes[0..8]);
    let mut end = [0u8; 8];
    end.copy_from_slice(&bytes[8..16]);
    let mut count = [0u8; 4];
    count.copy_from_slice(&bytes[16..20]);
    Ok(RateLimitCounter {
        key: key.clone(),
        window_start: millis_to_timestamp(i64::from_le_bytes(start))?,
        window_end: millis_to_timestamp(i64::from_le_bytes(end))?,
        count: u32::from_le_bytes(count),
    })
}

/// Whether a stored counter's window has closed by `now`. Records that do
/// not decode count as closed.
fn counter_window_closed(bytes: &[u8], now: Timestamp) -> bool {
    if bytes.len() != COUNTER_RECORD_LEN {
        return true;
    }
    let mut end = [0u8; 8];
    end.copy_from_slice(&bytes[8..16]);
    millis_to_timestamp(i64::from_le_bytes(end))
        .map(|window_end| now >= window_end)
        .unwrap_or(true)
}

#[async_trait]
impl ArtifactStore for LmdbStore {
    async fn get(&self, key: &ArtifactKey) -> NovaResult<Option<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let bytes = self
            .artifacts
            .get(&rtxn, &key.encode())
            .map_err(LmdbStoreError::from)?;
        match bytes {
            Some(bytes) => Ok(Some(decode_entry(bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, mut entry: CacheEntry) -> NovaResult<CacheEntry> {
        let encoded_key = entry.key.encode();
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;

        let existing_id = match self
            .artifacts
            .get(&wtxn, &encoded_key)
            .map_err(LmdbStoreError::from)?
        {
            Some(bytes) => decode_entry(bytes).ok().map(|e| e.entry_id),
            None => None,
        };
        if let Some(entry_id) = existing_id {
            entry.entry_id = entry_id;
        }

        let value =
            serde_json::to_vec(&entry).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        self.artifacts
            .put(&mut wtxn, &encoded_key, &value)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;

        Ok(entry)
    }

    async fn delete(&self, key: &ArtifactKey) -> NovaResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let deleted = self
            .artifacts
            .delete(&mut wtxn, &key.encode())
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(deleted)
    }

    async fn delete_topic(&self, topic_id: &str) -> NovaResult<u64> {
        let prefix = topic_prefix(topic_id);
        let keys = self.scan_artifacts(usize::MAX, |key, _| key.starts_with(&prefix))?;

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self
                .artifacts
                .delete(&mut wtxn, key)
                .map_err(LmdbStoreError::from)?
            {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(deleted)
    }

    async fn delete_older_than(&self, cutoff: Timestamp, limit: usize) -> NovaResult<u64> {
        let candidates = self.scan_artifacts(limit, |_, entry| entry.is_older_than(cutoff))?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let mut deleted = 0u64;
        for key in &candidates {
            // Re-check inside the write txn: the entry may have been refreshed.
            let still_expired = match self.artifacts.get(&wtxn, key).map_err(LmdbStoreError::from)? {
                Some(bytes) => decode_entry(bytes)
                    .map(|e| e.is_older_than(cutoff))
                    .unwrap_or(true),
                None => false,
            };
            if still_expired
                && self
                    .artifacts
                    .delete(&mut wtxn, key)
                    .map_err(LmdbStoreError::from)?
            {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(deleted)
    }

    async fn count(&self) -> NovaResult<u64> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        Ok(self.artifacts.len(&rtxn).map_err(LmdbStoreError::from)?)
    }
}

#[async_trait]
impl ClaimStore for LmdbStore {
    async fn try_claim(
        &self,
        key: &ArtifactKey,
        ttl: Duration,
        now: Timestamp,
    ) -> NovaResult<ClaimStatus> {
        let encoded_key = key.encode();
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;

        let held = match self.claims.get(&wtxn, &encoded_key).map_err(LmdbStoreError::from)? {
            Some(bytes) => match decode_claim(bytes) {
                Ok((expires_at, _)) if now < expires_at => Some(expires_at),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Overwriting undecodable claim");
                    None
                }
            },
            None => None,
        };

        if let Some(expires_at) = held {
            // Read-only outcome; nothing to commit.
            wtxn.abort();
            return Ok(ClaimStatus::AlreadyInFlight { expires_at });
        }

        let marker = ClaimMarker::new(key.clone(), now + to_offset(ttl));
        self.claims
            .put(&mut wtxn, &encoded_key, &encode_claim(&marker))
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;

        Ok(ClaimStatus::Granted(marker))
    }

    async fn release(&self, marker: &ClaimMarker) -> NovaResult<bool> {
        let encoded_key = marker.key.encode();
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;

        let owned = match self.claims.get(&wtxn, &encoded_key).map_err(LmdbStoreError::from)? {
            Some(bytes) => matches!(decode_claim(bytes), Ok((_, token)) if token == marker.token),
            None => false,
        };
        if !owned {
            wtxn.abort();
            return Ok(false);
        }

        self.claims
            .delete(&mut wtxn, &encoded_key)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(true)
    }

    async fn purge_expired_claims(&self, now: Timestamp) -> NovaResult<u64> {
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
            let mut keys = Vec::new();
            for result in self.claims.iter(&rtxn).map_err(LmdbStoreError::from)? {
                let (key, bytes) = result.map_err(LmdbStoreError::from)?;
                let expired = decode_claim(bytes)
                    .map(|(expires_at, _)| now >= expires_at)
                    .unwrap_or(true);
                if expired {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let mut purged = 0u64;
        for key in &expired {
            let still_expired = match self.claims.get(&wtxn, key).map_err(LmdbStoreError::from)? {
                Some(bytes) => decode_claim(bytes)
                    .map(|(expires_at, _)| now >= expires_at)
                    .unwrap_or(true),
                None => false,
            };
            if still_expired && self.claims.delete(&mut wtxn, key).map_err(LmdbStoreError::from)? {
                purged += 1;
            }
        }
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(purged)
    }
}

#[async_trait]
impl CounterStore for LmdbStore {
    async fn increment_and_check(
        &self,
        key: &CounterKey,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> NovaResult<CounterCheck> {
        let window = to_offset(window);
        let encoded_key = key.encode();
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;

        let existing = match self
            .counters
            .get(&wtxn, &encoded_key)
            .map_err(LmdbStoreError::from)?
        {
            Some(bytes) => match decode_counter(key, bytes) {
                Ok(counter) => Some(counter),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Overwriting undecodable counter");
                    None
                }
            },
            None => None,
        };
        let mut counter =
            existing.unwrap_or_else(|| RateLimitCounter::open(key.clone(), now, window));
        let count = counter.record(now, window);

        self.counters
            .put(&mut wtxn, &encoded_key, &encode_counter(&counter))
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;

        Ok(CounterCheck {
            allowed: count <= limit,
            count,
            window_end: counter.window_end,
        })
    }

    async fn purge_expired_counters(&self, now: Timestamp) -> NovaResult<u64> {
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
            let mut keys = Vec::new();
            for result in self.counters.iter(&rtxn).map_err(LmdbStoreError::from)? {
                let (key, bytes) = result.map_err(LmdbStoreError::from)?;
                if counter_window_closed(bytes, now) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };
        if expired.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let mut purged = 0u64;
        for key in &expired {
            // A caller may have reopened the window since the scan.
            let still_closed = match self.counters.get(&wtxn, key).map_err(LmdbStoreError::from)? {
                Some(bytes) => counter_window_closed(bytes, now),
                None => false,
            };
            if still_closed && self.counters.delete(&mut wtxn, key).map_err(LmdbStoreError::from)? {
                purged += 1;
            }
        }
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(purged)
    }
}
