//! Artifact cache with claim-based duplicate-generation suppression.
//!
//! Generation is slow and expensive, so the cache is more than a key/value
//! map: a caller that misses must [`ArtifactCache::claim`] the key before
//! generating. Only one claim per key is live at a time; everyone else
//! polls the cache until the holder's [`ArtifactCache::put`] lands or the
//! claim expires.
//!
//! # Failure semantics
//!
//! Reads never fail: an unreachable store is a miss. Writes never fail
//! either: the freshly generated payload is handed back to the caller even
//! when it could not be persisted. Only administrative invalidation
//! surfaces storage errors.
//!
//! # Example
//!
//! ```ignore
//! let cache = ArtifactCache::new(Arc::new(InMemoryStore::new()), ArtifactCacheConfig::default());
//! let key = ArtifactKey::for_user(topic_id, user_id, "VISUAL");
//!
//! if let Some(entry) = cache.get(&key).await {
//!     return entry;
//! }
//! let claim = cache.claim(&key).await;
//! if claim.may_generate() {
//!     let entry = cache.put(&key, generate().await?).await;
//!     cache.release(&claim).await;
//! }
//! ```

pub mod artifact_cache;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod store_key;
pub mod traits;

pub use artifact_cache::{ArtifactCache, ArtifactCacheConfig};
pub use lmdb_backend::{LmdbStore, LmdbStoreError};
pub use memory_backend::InMemoryStore;
pub use store_key::StoreKey;
pub use traits::{ArtifactStore, CacheStats, ClaimStore, CounterCheck, CounterStore};
