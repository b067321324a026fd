//! Candidate content query consumed by daily rotation.

use async_trait::async_trait;
use nova_core::{ContentCategory, NovaResult};

/// External query for the published content ids of a category.
///
/// Order and uniqueness of the returned ids are not relied upon; callers
/// canonicalize before selecting.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidate_ids(&self, category: ContentCategory) -> NovaResult<Vec<String>>;
}
