//! Nova Test Utilities
//!
//! Centralized test infrastructure for the Nova workspace:
//! - Candidate sources with fixed, shuffled or failing behavior
//! - A store wrapper with switchable faults per concern
//! - Proptest generators for keys, artifacts and candidate sets
//! - Fixtures and assertions for common scenarios

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

// Re-export core types for convenience
pub use nova_core::{
    ArtifactKey, CacheEntry, ClaimMarker, ClaimStatus, ContentCategory, CounterKey,
    GeneratedArtifact, GenerationError, NovaError, NovaResult, StorageError, Timestamp,
};
pub use nova_storage::{
    ArtifactStore, CandidateSource, ClaimStore, CounterCheck, CounterStore, InMemoryStore,
};

// ============================================================================
// CANDIDATE SOURCES
// ============================================================================

/// Candidate source that returns the same ids every time, per category.
#[derive(Debug, Clone, Default)]
pub struct StaticCandidateSource {
    arcade: Vec<String>,
    discovery: Vec<String>,
}

impl StaticCandidateSource {
    /// Same ids for every category.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        Self {
            arcade: ids.clone(),
            discovery: ids,
        }
    }

    /// `count` ids named `{prefix}-000`, `{prefix}-001`, ...
    pub fn numbered(prefix: &str, count: usize) -> Self {
        Self::new((0..count).map(|i| format!("{prefix}-{i:03}")))
    }

    pub fn with_category(mut self, category: ContentCategory, ids: Vec<String>) -> Self {
        match category {
            ContentCategory::Arcade => self.arcade = ids,
            ContentCategory::Discovery => self.discovery = ids,
        }
        self
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn candidate_ids(&self, category: ContentCategory) -> NovaResult<Vec<String>> {
        Ok(match category {
            ContentCategory::Arcade => self.arcade.clone(),
            ContentCategory::Discovery => self.discovery.clone(),
        })
    }
}

/// Candidate source that returns its ids in a different order, with
/// duplicates, on every call. Models a store without a stable order.
#[derive(Debug, Default)]
pub struct ShufflingCandidateSource {
    ids: Vec<String>,
    calls: AtomicUsize,
}

impl ShufflingCandidateSource {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSource for ShufflingCandidateSource {
    async fn candidate_ids(&self, _category: ContentCategory) -> NovaResult<Vec<String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut ids = self.ids.clone();
        if !ids.is_empty() {
            let len = ids.len();
            ids.rotate_left(n % len);
            if n % 2 == 1 {
                ids.reverse();
            }
            // Content rows repeat topic ids.
            let dup = ids[n % len].clone();
            ids.push(dup);
        }
        Ok(ids)
    }
}

/// Candidate source whose query always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingCandidateSource;

#[async_trait]
impl CandidateSource for FailingCandidateSource {
    async fn candidate_ids(&self, _category: ContentCategory) -> NovaResult<Vec<String>> {
        Err(unavailable("content store offline"))
    }
}

// ============================================================================
// FAULTY STORE
// ============================================================================

/// [`InMemoryStore`] with switchable failures for each concern.
///
/// Flags can be flipped at any time, including while other tasks use the
/// store.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_claims: AtomicBool,
    fail_counters: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that fails every call.
    pub fn down() -> Self {
        let store = Self::new();
        store.set_all(true);
        store
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_counters(&self, fail: bool) {
        self.fail_counters.store(fail, Ordering::SeqCst);
    }

    pub fn set_all(&self, fail: bool) {
        self.set_fail_reads(fail);
        self.set_fail_writes(fail);
        self.set_fail_claims(fail);
        self.set_fail_counters(fail);
    }

    fn check(flag: &AtomicBool, what: &str) -> NovaResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(unavailable(what));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FaultyStore {
    async fn get(&self, key: &ArtifactKey) -> NovaResult<Option<CacheEntry>> {
        Self::check(&self.fail_reads, "read")?;
        self.inner.get(key).await
    }

    async fn upsert(&self, entry: CacheEntry) -> NovaResult<CacheEntry> {
        Self::check(&self.fail_writes, "write")?;
        self.inner.upsert(entry).await
    }

    async fn delete(&self, key: &ArtifactKey) -> NovaResult<bool> {
        Self::check(&self.fail_writes, "delete")?;
        self.inner.delete(key).await
    }

    async fn delete_topic(&self, topic_id: &str) -> NovaResult<u64> {
        Self::check(&self.fail_writes, "delete")?;
        self.inner.delete_topic(topic_id).await
    }

    async fn delete_older_than(&self, cutoff: Timestamp, limit: usize) -> NovaResult<u64> {
        Self::check(&self.fail_writes, "delete")?;
        self.inner.delete_older_than(cutoff, limit).await
    }

    async fn count(&self) -> NovaResult<u64> {
        Self::check(&self.fail_reads, "count")?;
        self.inner.count().await
    }
}

#[async_trait]
impl ClaimStore for FaultyStore {
    async fn try_claim(
        &self,
        key: &ArtifactKey,
        ttl: Duration,
        now: Timestamp,
    ) -> NovaResult<ClaimStatus> {
        Self::check(&self.fail_claims, "claim")?;
        self.inner.try_claim(key, ttl, now).await
    }

    async fn release(&self, marker: &ClaimMarker) -> NovaResult<bool> {
        Self::check(&self.fail_claims, "release")?;
        self.inner.release(marker).await
    }

    async fn purge_expired_claims(&self, now: Timestamp) -> NovaResult<u64> {
        Self::check(&self.fail_claims, "purge")?;
        self.inner.purge_expired_claims(now).await
    }
}

#[async_trait]
impl CounterStore for FaultyStore {
    async fn increment_and_check(
        &self,
        key: &CounterKey,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> NovaResult<CounterCheck> {
        Self::check(&self.fail_counters, "counter")?;
        self.inner.increment_and_check(key, limit, window, now).await
    }

    async fn purge_expired_counters(&self, now: Timestamp) -> NovaResult<u64> {
        Self::check(&self.fail_counters, "counter purge")?;
        self.inner.purge_expired_counters(now).await
    }
}

fn unavailable(what: &str) -> NovaError {
    StorageError::Unavailable {
        reason: format!("injected {what} failure"),
    }
    .into()
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Nova types.

    use super::*;
    use proptest::prelude::*;

    /// Opaque id made of characters real ids use, including separators.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9:_-]{1,24}"
    }

    pub fn arb_category() -> impl Strategy<Value = ContentCategory> {
        prop_oneof![Just(ContentCategory::Arcade), Just(ContentCategory::Discovery)]
    }

    /// A calendar day between 2020 and 2035.
    pub fn arb_day() -> impl Strategy<Value = chrono::NaiveDate> {
        (0i64..5844).prop_map(|offset| epoch_day() + chrono::Duration::days(offset))
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2020-2030)
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Per-user or shared key.
    pub fn arb_artifact_key() -> impl Strategy<Value = ArtifactKey> {
        (arb_id(), proptest::option::of(arb_id()), "[A-Z_]{1,12}")
            .prop_map(|(topic, user, variant)| ArtifactKey::new(topic, user, variant))
    }

    pub fn arb_artifact() -> impl Strategy<Value = GeneratedArtifact> {
        ("[a-z ]{0,40}", 0i64..20, 0i64..120_000).prop_map(|(text, images, ms)| {
            GeneratedArtifact::new(serde_json::json!({ "text": text }))
                .with_counter("content_images_generated", images)
                .with_generation_ms(ms)
        })
    }

    /// Candidate ids in arbitrary order, possibly repeated.
    pub fn arb_candidates(max: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z0-9]{1,8}", 1..max.max(2))
    }

    fn epoch_day() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;

    /// Fixed reference instant: 2023-11-14T22:13:20Z plus `secs`.
    pub fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// A lesson artifact shaped like the content generator's output.
    pub fn lesson_artifact(topic: &str) -> GeneratedArtifact {
        GeneratedArtifact::new(serde_json::json!({
            "topic": topic,
            "sections": ["Introduction", "Key ideas", "Quiz"],
        }))
        .with_counter("content_images_generated", 3)
        .with_counter("flashcard_images_generated", 5)
        .with_metadata(serde_json::json!({ "learning_preference": "VISUAL" }))
    }

    /// A per-user key with the default learning-style variant.
    pub fn visual_key(topic: &str, user: &str) -> ArtifactKey {
        ArtifactKey::for_user(topic, user, "VISUAL")
    }

    /// An entry for `topic` created at `created_at`.
    pub fn entry_at(topic: &str, created_at: Timestamp) -> CacheEntry {
        CacheEntry::new(
            ArtifactKey::shared(topic, "VISUAL"),
            lesson_artifact(topic),
            created_at,
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Nova-specific outcomes.

    use super::*;

    /// Assert that a NovaResult is a rate-limit denial by policy.
    #[track_caller]
    pub fn assert_rate_limited<T: std::fmt::Debug>(result: &NovaResult<T>) {
        match result {
            Err(NovaError::Generation(GenerationError::RateLimited { .. })) => {}
            other => panic!("Expected RateLimited, got: {:?}", other),
        }
    }

    /// Assert that a NovaResult is a denial caused by limiter outage.
    #[track_caller]
    pub fn assert_limiter_unavailable<T: std::fmt::Debug>(result: &NovaResult<T>) {
        match result {
            Err(NovaError::Generation(GenerationError::LimiterUnavailable { .. })) => {}
            other => panic!("Expected LimiterUnavailable, got: {:?}", other),
        }
    }

    /// Assert that a NovaResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &NovaResult<T>) {
        match result {
            Err(NovaError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
