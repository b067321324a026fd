//! Error types for Nova operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors from the generate-or-fetch pipeline.
///
/// `RateLimited` and `LimiterUnavailable` are both denials, but only the
/// first one is a policy decision; the second is an outage under a
/// fail-closed limiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Rate limit exceeded for {endpoint}, retry after {retry_after_secs}s")]
    RateLimited {
        endpoint: String,
        retry_after_secs: u64,
    },

    #[error("Rate limiter unavailable for {endpoint}; request denied")]
    LimiterUnavailable { endpoint: String },

    #[error("Generation for {key} already in flight; gave up after {waited_ms}ms")]
    InFlight { key: String, waited_ms: u64 },

    #[error("Generation for {key} timed out after {timeout_ms}ms")]
    TimedOut { key: String, timeout_ms: u64 },

    #[error("Generation for {key} failed: {reason}")]
    Failed { key: String, reason: String },
}

/// Master error type for all Nova errors.
#[derive(Debug, Clone, Error)]
pub enum NovaError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
}

impl NovaError {
    /// True when the error came from a denied rate-limit check, whether by
    /// budget or by outage.
    pub fn is_rate_limit_denial(&self) -> bool {
        matches!(
            self,
            NovaError::Generation(
                GenerationError::RateLimited { .. } | GenerationError::LimiterUnavailable { .. }
            )
        )
    }
}

/// Result type alias for Nova operations.
pub type NovaResult<T> = Result<T, NovaError>;

// =============================================================================
// TESTS
// =============================================================================
