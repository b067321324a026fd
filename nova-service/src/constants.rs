//! Constants for the Nova service layer
//!
//! Defaults for every tunable read by [`crate::config`]. Centralizing them
//! keeps the environment documentation and the tests in one place.

// ============================================================================
// CACHE RETENTION & CLEANUP
// ============================================================================

/// Age after which a cached artifact is swept (24 hours)
pub const DEFAULT_CACHE_RETENTION_SECS: u64 = 86_400;

/// How often the cleanup scheduler sweeps (24 hours)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// Maximum entries deleted per storage call during a sweep
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;

// ============================================================================
// GENERATION CLAIMS
// ============================================================================

/// Lifetime of a generation claim marker. Must not be shorter than
/// [`DEFAULT_GENERATION_TIMEOUT_SECS`] or a slow generation loses its claim.
pub const DEFAULT_CLAIM_TTL_SECS: u64 = 90;

/// How long a caller waits on another caller's in-flight generation
pub const DEFAULT_CLAIM_WAIT_MS: u64 = 15_000;

/// Poll interval while waiting on an in-flight generation
pub const DEFAULT_CLAIM_POLL_MS: u64 = 250;

/// Upper bound on a single generation call
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Generation calls allowed per user per window
pub const DEFAULT_GENERATION_LIMIT: u32 = 10;

/// Fixed rate-limit window (1 hour)
pub const DEFAULT_GENERATION_WINDOW_SECS: u64 = 3_600;

/// Endpoint name under which generation calls are counted
pub const DEFAULT_GENERATION_ENDPOINT: &str = "generate-content";

// ============================================================================
// ROTATION
// ============================================================================

/// Offset from UTC of the zone in which a rotation "day" is measured
pub const DEFAULT_ROTATION_UTC_OFFSET_SECS: i32 = 0;

// ============================================================================
// STORAGE
// ============================================================================

/// Default LMDB directory for the worker
pub const DEFAULT_STORE_PATH: &str = "./data/nova-cache";

/// Default LMDB map size in megabytes
pub const DEFAULT_STORE_MAX_SIZE_MB: usize = 256;

// ============================================================================
// LOGGING
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "nova_service=debug,nova_storage=info,info";
