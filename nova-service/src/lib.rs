//! Nova Service - Rotation, Generation and Cleanup
//!
//! The layer that decides which content a user sees each day, reuses
//! expensively generated artifacts instead of regenerating them, and keeps
//! the generation backend inside a per-user budget.
//!
//! - [`rotation`]: deterministic "content of the day"
//! - [`generation`]: rate-limited generate-or-fetch over the artifact cache
//! - [`rate_limit`]: atomic fixed-window budgets
//! - [`jobs`]: background cache cleanup
//! - [`config`], [`constants`], [`telemetry`]: ambient setup

pub mod config;
pub mod constants;
pub mod generation;
pub mod jobs;
pub mod rate_limit;
pub mod rotation;
pub mod telemetry;

pub use config::NovaConfig;
pub use generation::{ArtifactResponse, ArtifactSource, GenerationConfig, GenerationPipeline};
pub use jobs::{CleanupConfig, CleanupScheduler, CleanupStatus, SweepReport};
pub use rate_limit::{RateLimitDecision, RateLimitFailurePolicy, RateLimiter};
pub use rotation::{canonical_candidates, choose, parse_day, selector_key, RotationService};
pub use telemetry::{init_tracing, TelemetryConfig};

// Re-export the types callers need to use the service layer.
pub use nova_core::{
    ArtifactKey, CacheEntry, ContentCategory, GeneratedArtifact, GenerationError, NovaError,
    NovaResult,
};
pub use nova_storage::{ArtifactCache, CandidateSource, InMemoryStore, LmdbStore};
