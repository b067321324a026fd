//! Nova Core - Rotation, Artifact and Rate-Limit Types
//!
//! Pure data structures plus the stable hash selector. Every other crate in
//! the workspace depends on this one; nothing here touches storage or time
//! beyond the timestamps carried inside the types.

pub mod entities;
pub mod error;
pub mod selector;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use entities::{
    ArtifactKey, CacheEntry, ClaimMarker, ClaimStatus, ContentCategory, CounterKey,
    GeneratedArtifact, RateLimitCounter,
};
pub use error::{
    ConfigError, GenerationError, NovaError, NovaResult, StorageError, ValidationError,
};
pub use selector::{select, select_index, stable_hash};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for generation measurements.
pub type DurationMs = i64;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Convert a configured duration into a timestamp offset, saturating at
/// one hundred years so adding it to "now" cannot overflow.
pub fn to_offset(duration: std::time::Duration) -> chrono::Duration {
    const CAP_DAYS: i64 = 36_500;
    chrono::Duration::from_std(duration)
        .ok()
        .filter(|d| *d < chrono::Duration::days(CAP_DAYS))
        .unwrap_or_else(|| chrono::Duration::days(CAP_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_offset_saturates() {
        let thirty = std::time::Duration::from_secs(30);
        assert_eq!(to_offset(thirty), chrono::Duration::seconds(30));
        assert_eq!(to_offset(std::time::Duration::MAX), chrono::Duration::days(36_500));
    }

    #[test]
    fn test_new_entity_ids_are_unique() {
        assert_ne!(new_entity_id(), new_entity_id());
    }
}
