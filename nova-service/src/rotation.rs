//! Daily content rotation.
//!
//! Picks one content id per (user, calendar day, category) without storing
//! anything per user. The answer is a pure function of the selector key
//! `"{user_id}:{CATEGORY}:{YYYY-MM-DD}"` and the canonically ordered
//! candidate list, so every process instance agrees on it for the whole day.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use nova_core::{select, ContentCategory, Timestamp, ValidationError};
use nova_storage::CandidateSource;

/// Calendar-day format used in selector keys.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Build the selector key for one user, category and day.
pub fn selector_key(user_id: &str, category: ContentCategory, date: NaiveDate) -> String {
    format!("{}:{}:{}", user_id, category.as_str(), date.format(DAY_FORMAT))
}

/// Put candidate ids into canonical order: trimmed, blanks dropped,
/// ascending, unique.
pub fn canonical_candidates(ids: Vec<String>) -> Vec<String> {
    let mut ids: Vec<String> = ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Select from an arbitrary candidate list after canonicalizing it.
pub fn choose(
    user_id: &str,
    category: ContentCategory,
    date: NaiveDate,
    candidates: Vec<String>,
) -> Option<String> {
    if user_id.is_empty() {
        return None;
    }
    let candidates = canonical_candidates(candidates);
    select(&selector_key(user_id, category, date), &candidates).cloned()
}

/// Parse a `YYYY-MM-DD` calendar day.
pub fn parse_day(date: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(date, DAY_FORMAT).map_err(|e| ValidationError::InvalidValue {
        field: "date".to_string(),
        reason: format!("expected {}: {}", DAY_FORMAT, e),
    })
}

/// Deterministic "content of the day" service.
pub struct RotationService<C: CandidateSource> {
    source: Arc<C>,
    offset: FixedOffset,
}

impl<C: CandidateSource> RotationService<C> {
    /// Create a service whose days are measured in the zone at `offset`.
    pub fn new(source: Arc<C>, offset: FixedOffset) -> Self {
        Self { source, offset }
    }

    /// Create a service whose days are UTC days.
    pub fn utc(source: Arc<C>) -> Self {
        Self::new(source, Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar day containing `now` in the reference zone.
    pub fn day_at(&self, now: Timestamp) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Today's calendar day in the reference zone.
    pub fn today(&self) -> NaiveDate {
        self.day_at(Utc::now())
    }

    /// Pick the content id for `user_id` on `date` within `category`.
    ///
    /// Returns `None` for an empty user id, an empty candidate set, or a
    /// failed candidate fetch. Never errors.
    pub async fn select_for_today(
        &self,
        user_id: &str,
        date: NaiveDate,
        category: ContentCategory,
    ) -> Option<String> {
        if user_id.is_empty() {
            tracing::debug!(%category, "Rotation requested without a user id");
            return None;
        }

        let candidates = match self.source.candidate_ids(category).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(
                    %category,
                    error = %e,
                    "Candidate fetch failed; no selection"
                );
                return None;
            }
        };

        let selection = choose(user_id, category, date, candidates);
        match &selection {
            Some(content_id) => {
                tracing::debug!(%category, %date, content_id = %content_id, "Rotation selected content");
            }
            None => {
                tracing::debug!(%category, %date, "No candidates for rotation");
            }
        }
        selection
    }

    /// [`select_for_today`](Self::select_for_today) for the current day in
    /// the reference zone.
    pub async fn select_for_now(&self, user_id: &str, category: ContentCategory) -> Option<String> {
        self.select_for_today(user_id, self.today(), category).await
    }

    /// [`select_for_today`](Self::select_for_today) with a `YYYY-MM-DD`
    /// string. An unparseable date yields no selection.
    pub async fn select_for_day_str(
        &self,
        user_id: &str,
        date: &str,
        category: ContentCategory,
    ) -> Option<String> {
        match parse_day(date) {
            Ok(day) => self.select_for_today(user_id, day, category).await,
            Err(e) => {
                tracing::warn!(date, error = %e, "Rejected rotation date");
                None
            }
        }
    }
}
