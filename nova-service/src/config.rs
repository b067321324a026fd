//! Service Configuration Module
//!
//! Aggregates every tunable of the service layer: cleanup cadence and
//! retention, claim timing, generation budget and rate-limit failure policy,
//! the rotation reference offset and the persistent store location.
//! Configuration is loaded from environment variables with defaults from
//! [`crate::constants`]; unparseable values fall back to the default and
//! [`NovaConfig::validate`] rejects values that parse but make no sense.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use nova_core::ConfigError;
use nova_storage::ArtifactCacheConfig;

use crate::constants::{
    DEFAULT_CLAIM_POLL_MS, DEFAULT_CLAIM_TTL_SECS, DEFAULT_CLAIM_WAIT_MS,
    DEFAULT_GENERATION_ENDPOINT, DEFAULT_GENERATION_LIMIT, DEFAULT_GENERATION_TIMEOUT_SECS,
    DEFAULT_GENERATION_WINDOW_SECS, DEFAULT_ROTATION_UTC_OFFSET_SECS, DEFAULT_STORE_MAX_SIZE_MB,
    DEFAULT_STORE_PATH,
};
use crate::generation::GenerationConfig;
use crate::jobs::CleanupConfig;
use crate::rate_limit::RateLimitFailurePolicy;

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Configuration for the rotation, generation and cleanup services.
#[derive(Debug, Clone)]
pub struct NovaConfig {
    // ========================================================================
    // Cleanup
    // ========================================================================
    /// Sweep cadence, retention threshold and batch size.
    pub cleanup: CleanupConfig,

    // ========================================================================
    // Claims
    // ========================================================================
    /// Lifetime of a generation claim marker.
    pub claim_ttl: Duration,

    /// How long a caller waits on someone else's in-flight generation.
    pub claim_wait: Duration,

    /// Poll interval while waiting.
    pub claim_poll_interval: Duration,

    // ========================================================================
    // Generation & rate limiting
    // ========================================================================
    /// Upper bound on one generation call.
    pub generation_timeout: Duration,

    /// Generation calls allowed per user per window.
    pub generation_limit: u32,

    /// Fixed rate-limit window.
    pub generation_window: Duration,

    /// What the limiter answers when its store is unreachable.
    pub rate_limit_failure_policy: RateLimitFailurePolicy,

    // ========================================================================
    // Rotation
    // ========================================================================
    /// Seconds east of UTC of the zone whose calendar day drives rotation.
    pub rotation_utc_offset_secs: i32,

    // ========================================================================
    // Storage
    // ========================================================================
    /// LMDB directory.
    pub store_path: PathBuf,

    /// LMDB map size in megabytes.
    pub store_max_size_mb: usize,
}

impl Default for NovaConfig {
    fn default() -> Self {
        Self {
            cleanup: CleanupConfig::default(),
            claim_ttl: Duration::from_secs(DEFAULT_CLAIM_TTL_SECS),
            claim_wait: Duration::from_millis(DEFAULT_CLAIM_WAIT_MS),
            claim_poll_interval: Duration::from_millis(DEFAULT_CLAIM_POLL_MS),
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            generation_limit: DEFAULT_GENERATION_LIMIT,
            generation_window: Duration::from_secs(DEFAULT_GENERATION_WINDOW_SECS),
            rate_limit_failure_policy: RateLimitFailurePolicy::default(),
            rotation_utc_offset_secs: DEFAULT_ROTATION_UTC_OFFSET_SECS,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            store_max_size_mb: DEFAULT_STORE_MAX_SIZE_MB,
        }
    }
}

impl NovaConfig {
    /// Create NovaConfig from environment variables.
    ///
    /// Environment variables:
    /// - `NOVA_CACHE_RETENTION_SECS`, `NOVA_SWEEP_INTERVAL_SECS`,
    ///   `NOVA_SWEEP_BATCH_SIZE`: see [`CleanupConfig::from_env`]
    /// - `NOVA_CLAIM_TTL_SECS`: Claim marker lifetime, at least the
    ///   generation timeout (default: 90)
    /// - `NOVA_CLAIM_WAIT_MS`: Wait on in-flight generation (default: 15000)
    /// - `NOVA_CLAIM_POLL_MS`: Poll interval while waiting (default: 250)
    /// - `NOVA_GENERATION_TIMEOUT_SECS`: Generation bound (default: 60)
    /// - `NOVA_GENERATION_LIMIT`: Calls per user per window (default: 10)
    /// - `NOVA_GENERATION_WINDOW_SECS`: Window length (default: 3600)
    /// - `NOVA_RATE_LIMIT_FAIL_OPEN`: "true" to allow calls when the limiter
    ///   store is down (default: false, deny)
    /// - `NOVA_ROTATION_UTC_OFFSET_SECS`: Rotation day offset (default: 0)
    /// - `NOVA_STORE_PATH`: LMDB directory (default: ./data/nova-cache)
    /// - `NOVA_STORE_MAX_SIZE_MB`: LMDB map size (default: 256)
    pub fn from_env() -> Self {
        let claim_ttl = Duration::from_secs(
            std::env::var("NOVA_CLAIM_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CLAIM_TTL_SECS),
        );

        let claim_wait = Duration::from_millis(
            std::env::var("NOVA_CLAIM_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CLAIM_WAIT_MS),
        );

        let claim_poll_interval = Duration::from_millis(
            std::env::var("NOVA_CLAIM_POLL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CLAIM_POLL_MS),
        );

        let generation_timeout = Duration::from_secs(
            std::env::var("NOVA_GENERATION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS),
        );

        let generation_limit = std::env::var("NOVA_GENERATION_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_GENERATION_LIMIT);

        let generation_window = Duration::from_secs(
            std::env::var("NOVA_GENERATION_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_GENERATION_WINDOW_SECS),
        );

        let rate_limit_failure_policy = std::env::var("NOVA_RATE_LIMIT_FAIL_OPEN")
            .ok()
            .map(|s| {
                if s.to_lowercase() == "true" {
                    RateLimitFailurePolicy::FailOpen
                } else {
                    RateLimitFailurePolicy::FailClosed
                }
            })
            .unwrap_or_default();

        let rotation_utc_offset_secs = std::env::var("NOVA_ROTATION_UTC_OFFSET_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ROTATION_UTC_OFFSET_SECS);

        let store_path = std::env::var("NOVA_STORE_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));

        let store_max_size_mb = std::env::var("NOVA_STORE_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_STORE_MAX_SIZE_MB);

        Self {
            cleanup: CleanupConfig::from_env(),
            claim_ttl,
            claim_wait,
            claim_poll_interval,
            generation_timeout,
            generation_limit,
            generation_window,
            rate_limit_failure_policy,
            rotation_utc_offset_secs,
            store_path,
            store_max_size_mb,
        }
    }

    /// Short intervals for local development and tests.
    pub fn development() -> Self {
        Self {
            cleanup: CleanupConfig::development(),
            claim_ttl: Duration::from_secs(30),
            claim_wait: Duration::from_secs(5),
            claim_poll_interval: Duration::from_millis(100),
            generation_timeout: Duration::from_secs(20),
            generation_limit: 100,
            generation_window: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Production settings: defaults, always failing closed.
    pub fn production() -> Self {
        Self {
            cleanup: CleanupConfig::production(),
            rate_limit_failure_policy: RateLimitFailurePolicy::FailClosed,
            ..Self::default()
        }
    }

    /// Reject values that would stall timers or disable a component.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cleanup.validate()?;

        require_nonzero("NOVA_CLAIM_TTL_SECS", self.claim_ttl)?;
        require_nonzero("NOVA_CLAIM_POLL_MS", self.claim_poll_interval)?;
        require_nonzero("NOVA_GENERATION_TIMEOUT_SECS", self.generation_timeout)?;
        require_nonzero("NOVA_GENERATION_WINDOW_SECS", self.generation_window)?;

        if self.claim_ttl < self.generation_timeout {
            return Err(ConfigError::InvalidValue {
                field: "NOVA_CLAIM_TTL_SECS".to_string(),
                value: self.claim_ttl.as_secs().to_string(),
                reason: format!(
                    "claims must outlive the {}s generation timeout",
                    self.generation_timeout.as_secs()
                ),
            });
        }

        if self.generation_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "NOVA_GENERATION_LIMIT".to_string(),
                value: "0".to_string(),
                reason: "a zero budget denies every generation".to_string(),
            });
        }

        self.rotation_offset()?;

        if self.store_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "NOVA_STORE_MAX_SIZE_MB".to_string(),
                value: "0".to_string(),
                reason: "map size must be positive".to_string(),
            });
        }

        Ok(())
    }

    /// Offset of the rotation reference zone.
    pub fn rotation_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.rotation_utc_offset_secs).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "NOVA_ROTATION_UTC_OFFSET_SECS".to_string(),
                value: self.rotation_utc_offset_secs.to_string(),
                reason: "offset must be within one day of UTC".to_string(),
            }
        })
    }

    /// Settings for the artifact cache facade.
    pub fn artifact_cache_config(&self) -> ArtifactCacheConfig {
        ArtifactCacheConfig::default().with_claim_ttl(self.claim_ttl)
    }

    /// Settings for the generate-or-fetch pipeline.
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            endpoint: DEFAULT_GENERATION_ENDPOINT.to_string(),
            limit: self.generation_limit,
            window: self.generation_window,
            timeout: self.generation_timeout,
            claim_wait: self.claim_wait,
            poll_interval: self.claim_poll_interval,
        }
    }
}

pub(crate) fn require_nonzero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0".to_string(),
            reason: "duration must be positive".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = NovaConfig::default();
        assert_eq!(config.claim_ttl, Duration::from_secs(90));
        assert!(config.claim_ttl >= config.generation_timeout);
        assert_eq!(config.generation_limit, 10);
        assert_eq!(config.generation_window, Duration::from_secs(3600));
        assert_eq!(
            config.rate_limit_failure_policy,
            RateLimitFailurePolicy::FailClosed
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        assert!(NovaConfig::development().validate().is_ok());
        assert!(NovaConfig::production().validate().is_ok());
        assert!(
            NovaConfig::development().cleanup.sweep_interval
                < NovaConfig::production().cleanup.sweep_interval
        );
    }

    #[test]
    fn test_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _limit = EnvVarGuard::set("NOVA_GENERATION_LIMIT", Some("3"));
        let _open = EnvVarGuard::set("NOVA_RATE_LIMIT_FAIL_OPEN", Some("TRUE"));
        let _offset = EnvVarGuard::set("NOVA_ROTATION_UTC_OFFSET_SECS", Some("-18000"));

        let config = NovaConfig::from_env();
        assert_eq!(config.generation_limit, 3);
        assert_eq!(config.rate_limit_failure_policy, RateLimitFailurePolicy::FailOpen);
        assert_eq!(config.rotation_offset().unwrap().local_minus_utc(), -18_000);
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _limit = EnvVarGuard::set("NOVA_GENERATION_LIMIT", Some("lots"));
        let _open = EnvVarGuard::set("NOVA_RATE_LIMIT_FAIL_OPEN", None);
        let _offset = EnvVarGuard::set("NOVA_ROTATION_UTC_OFFSET_SECS", None);

        let config = NovaConfig::from_env();
        assert_eq!(config.generation_limit, DEFAULT_GENERATION_LIMIT);
        assert_eq!(
            config.rate_limit_failure_policy,
            RateLimitFailurePolicy::FailClosed
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = NovaConfig {
            generation_limit: 0,
            ..NovaConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "NOVA_GENERATION_LIMIT"
        ));

        let config = NovaConfig {
            claim_poll_interval: Duration::ZERO,
            ..NovaConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_claim_shorter_than_generation() {
        let config = NovaConfig {
            claim_ttl: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(60),
            ..NovaConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "NOVA_CLAIM_TTL_SECS"
        ));

        let config = NovaConfig {
            claim_ttl: Duration::from_secs(60),
            generation_timeout: Duration::from_secs(60),
            ..NovaConfig::default()
        };
        assert!(config.validate().is_ok());

        for preset in [NovaConfig::development(), NovaConfig::production()] {
            assert!(preset.claim_ttl >= preset.generation_timeout);
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_offset() {
        let config = NovaConfig {
            rotation_utc_offset_secs: 90_000,
            ..NovaConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_component_configs() {
        let config = NovaConfig::development();
        assert_eq!(config.artifact_cache_config().claim_ttl, config.claim_ttl);

        let generation = config.generation_config();
        assert_eq!(generation.limit, config.generation_limit);
        assert_eq!(generation.timeout, config.generation_timeout);
        assert_eq!(generation.endpoint, DEFAULT_GENERATION_ENDPOINT);
    }
}
