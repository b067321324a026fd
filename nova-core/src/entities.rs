//! Cache, claim and rate-limit entities.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::{new_entity_id, DurationMs, EntityId, Timestamp};

// ============================================================================
// CONTENT CATEGORIES
// ============================================================================

/// Daily feature a rotation is computed for.
///
/// Each category rotates independently: the same user on the same day gets
/// unrelated picks for `Arcade` and `Discovery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentCategory {
    Arcade,
    Discovery,
}

impl ContentCategory {
    /// All categories, in declaration order.
    pub const ALL: [ContentCategory; 2] = [ContentCategory::Arcade, ContentCategory::Discovery];

    /// Stable wire name. Part of the selector key, so it must never change.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Arcade => "ARCADE",
            ContentCategory::Discovery => "DISCOVERY",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ARCADE" => Ok(ContentCategory::Arcade),
            "DISCOVERY" => Ok(ContentCategory::Discovery),
            other => Err(ValidationError::InvalidValue {
                field: "category".to_string(),
                reason: format!("unknown content category '{}'", other),
            }),
        }
    }
}

// ============================================================================
// ARTIFACT CACHE
// ============================================================================

/// Identity of one cached artifact: `(topic, user, variant)`.
///
/// `user_id` is `None` for shared artifacts that are not tied to a learner.
/// Ordering is topic first, which keeps a topic's entries adjacent in
/// ordered stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    topic_id: String,
    user_id: Option<String>,
    variant_key: String,
}

impl ArtifactKey {
    pub fn new(
        topic_id: impl Into<String>,
        user_id: Option<String>,
        variant_key: impl Into<String>,
    ) -> Self {
        Self {
            topic_id: topic_id.into(),
            user_id,
            variant_key: variant_key.into(),
        }
    }

    /// Key for an artifact generated for one user.
    pub fn for_user(
        topic_id: impl Into<String>,
        user_id: impl Into<String>,
        variant_key: impl Into<String>,
    ) -> Self {
        Self::new(topic_id, Some(user_id.into()), variant_key)
    }

    /// Key for an anonymous artifact shared by every user.
    pub fn shared(topic_id: impl Into<String>, variant_key: impl Into<String>) -> Self {
        Self::new(topic_id, None, variant_key)
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn variant_key(&self) -> &str {
        &self.variant_key
    }

    pub fn is_shared(&self) -> bool {
        self.user_id.is_none()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.topic_id,
            self.user_id.as_deref().unwrap_or("*"),
            self.variant_key
        )
    }
}

/// Output of one generation run, before it is stamped into a [`CacheEntry`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// Serialized content, opaque to the cache.
    pub payload: serde_json::Value,
    /// Named sub-artifact counts, e.g. `content_images_generated`.
    pub counters: BTreeMap<String, i64>,
    /// Free-form generation diagnostics.
    pub metadata: serde_json::Value,
    /// Wall time of the generation run.
    pub generation_ms: DurationMs,
}

impl GeneratedArtifact {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            counters: BTreeMap::new(),
            metadata: serde_json::Value::Null,
            generation_ms: 0,
        }
    }

    pub fn with_counter(mut self, name: impl Into<String>, value: i64) -> Self {
        self.counters.insert(name.into(), value);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_generation_ms(mut self, generation_ms: DurationMs) -> Self {
        self.generation_ms = generation_ms;
        self
    }
}

/// One previously computed artifact.
///
/// At most one live entry exists per [`ArtifactKey`]; stores upsert on the
/// key and keep the original `entry_id` when an entry is refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub entry_id: EntityId,
    #[serde(flatten)]
    pub key: ArtifactKey,
    pub payload: serde_json::Value,
    pub counters: BTreeMap<String, i64>,
    pub metadata: serde_json::Value,
    pub generation_ms: DurationMs,
    pub created_at: Timestamp,
}

impl CacheEntry {
    /// Stamp a generated artifact with a fresh id and creation time.
    pub fn new(key: ArtifactKey, artifact: GeneratedArtifact, created_at: Timestamp) -> Self {
        Self {
            entry_id: new_entity_id(),
            key,
            payload: artifact.payload,
            counters: artifact.counters,
            metadata: artifact.metadata,
            generation_ms: artifact.generation_ms,
            created_at,
        }
    }

    /// Strictly older than `cutoff`. An entry created exactly at the cutoff
    /// is not expired.
    pub fn is_older_than(&self, cutoff: Timestamp) -> bool {
        self.created_at < cutoff
    }

    pub fn age(&self, now: Timestamp) -> Duration {
        now - self.created_at
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

// ============================================================================
// CLAIMS
// ============================================================================

/// Short-lived exclusivity marker for one generation.
///
/// The `token` identifies the holder so a late release cannot remove a
/// claim that expired and was re-granted to someone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMarker {
    pub key: ArtifactKey,
    pub token: EntityId,
    pub expires_at: Timestamp,
}

impl ClaimMarker {
    pub fn new(key: ArtifactKey, expires_at: Timestamp) -> Self {
        Self {
            key,
            token: new_entity_id(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of trying to claim a key for generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimStatus {
    /// The caller holds the claim and should generate.
    Granted(ClaimMarker),
    /// Someone else is generating; poll the cache instead.
    AlreadyInFlight { expires_at: Timestamp },
    /// The claim store could not be reached. The caller may generate, but
    /// nothing prevents a concurrent duplicate.
    Unguarded,
}

impl ClaimStatus {
    /// True when the caller is allowed to start generating.
    pub fn may_generate(&self) -> bool {
        !matches!(self, ClaimStatus::AlreadyInFlight { .. })
    }

    pub fn marker(&self) -> Option<&ClaimMarker> {
        match self {
            ClaimStatus::Granted(marker) => Some(marker),
            _ => None,
        }
    }
}

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Identity of a rate-limit budget: one user on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    pub user_id: String,
    pub endpoint: String,
}

impl CounterKey {
    pub fn new(user_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.endpoint)
    }
}

/// Consumption of one budget within the current fixed window.
///
/// The window end is fixed when the window opens, so a closed counter can
/// be recognized without knowing which endpoint budget created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    #[serde(flatten)]
    pub key: CounterKey,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub count: u32,
}

impl RateLimitCounter {
    /// A fresh window of length `window` opened at `now`, with no calls
    /// counted yet.
    pub fn open(key: CounterKey, now: Timestamp, window: Duration) -> Self {
        Self {
            key,
            window_start: now,
            window_end: now + window,
            count: 0,
        }
    }

    /// The window has rolled over once `now >= window_end`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.window_end
    }

    /// Count one call, opening a new window of length `window` first if the
    /// current one has elapsed. Returns the post-increment count.
    pub fn record(&mut self, now: Timestamp, window: Duration) -> u32 {
        if self.is_expired(now) {
            self.window_start = now;
            self.window_end = now + window;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_category_round_trips_through_wire_name() {
        for category in ContentCategory::ALL {
            let parsed: ContentCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert_eq!("discovery".parse::<ContentCategory>().unwrap(), ContentCategory::Discovery);
        assert!("quiz".parse::<ContentCategory>().is_err());
    }

    #[test]
    fn test_category_serializes_as_wire_name() {
        let json = serde_json::to_string(&ContentCategory::Arcade).unwrap();
        assert_eq!(json, "\"ARCADE\"");
    }

    #[test]
    fn test_artifact_key_display_and_sharing() {
        let personal = ArtifactKey::for_user("topic-1", "user-9", "VISUAL");
        let shared = ArtifactKey::shared("topic-1", "VISUAL");
        assert_eq!(personal.to_string(), "topic-1/user-9/VISUAL");
        assert_eq!(shared.to_string(), "topic-1/*/VISUAL");
        assert!(shared.is_shared());
        assert!(!personal.is_shared());
        assert_ne!(personal, shared);
    }

    #[test]
    fn test_cache_entry_serializes_key_fields_flat() {
        let key = ArtifactKey::for_user("t", "u", "v");
        let entry = CacheEntry::new(key, GeneratedArtifact::new(serde_json::json!({"a": 1})), at(0));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["topic_id"], "t");
        assert_eq!(value["user_id"], "u");
        assert_eq!(value["variant_key"], "v");
        let back: CacheEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_cache_entry_age_boundary_is_strict() {
        let entry = CacheEntry::new(
            ArtifactKey::shared("t", "v"),
            GeneratedArtifact::default(),
            at(100),
        );
        assert!(!entry.is_older_than(at(100)));
        assert!(entry.is_older_than(at(101)));
        assert!(!entry.is_older_than(at(99)));
        assert_eq!(entry.age(at(160)), Duration::seconds(60));
    }

    #[test]
    fn test_generated_artifact_builder() {
        let artifact = GeneratedArtifact::new(serde_json::json!("lesson"))
            .with_counter("content_images_generated", 3)
            .with_metadata(serde_json::json!({"ai_model": "m"}))
            .with_generation_ms(1200);
        let entry = CacheEntry::new(ArtifactKey::shared("t", "v"), artifact, at(0));
        assert_eq!(entry.counter("content_images_generated"), 3);
        assert_eq!(entry.counter("missing"), 0);
        assert_eq!(entry.generation_ms, 1200);
    }

    #[test]
    fn test_claim_status_may_generate() {
        let marker = ClaimMarker::new(ArtifactKey::shared("t", "v"), at(30));
        assert!(ClaimStatus::Granted(marker.clone()).may_generate());
        assert!(ClaimStatus::Unguarded.may_generate());
        assert!(!ClaimStatus::AlreadyInFlight { expires_at: at(30) }.may_generate());
        assert!(marker.is_expired(at(30)));
        assert!(!marker.is_expired(at(29)));
    }

    #[test]
    fn test_counter_resets_when_window_elapses() {
        let window = Duration::seconds(60);
        let mut counter = RateLimitCounter::open(CounterKey::new("u", "e"), at(0), window);
        assert_eq!(counter.record(at(1), window), 1);
        assert_eq!(counter.record(at(59), window), 2);
        assert!(!counter.is_expired(at(59)));
        assert!(counter.is_expired(at(60)));
        assert_eq!(counter.record(at(60), window), 1);
        assert_eq!(counter.window_start, at(60));
        assert_eq!(counter.window_end, at(120));
    }
}
