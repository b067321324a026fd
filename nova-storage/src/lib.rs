//! Nova Storage - Artifact, Claim and Counter Stores
//!
//! Defines the storage seams the rotation/caching/rate-limiting core talks
//! to, including the candidate content query, plus an in-memory backend for
//! single-process deployments and tests and an LMDB backend for persistence
//! across restarts.

pub mod cache;
pub mod candidates;

pub use cache::{
    ArtifactCache, ArtifactCacheConfig, ArtifactStore, CacheStats, ClaimStore, CounterCheck,
    CounterStore, InMemoryStore, LmdbStore, LmdbStoreError, StoreKey,
};
pub use candidates::CandidateSource;
