//! Tracing Subscriber Initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! JSON or a human-readable formatting layer.

use nova_core::{ConfigError, NovaResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::DEFAULT_LOG_FILTER;

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Emit JSON lines instead of pretty output
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("NOVA_SERVICE_NAME")
                .unwrap_or_else(|_| "nova-worker".to_string()),
            json: std::env::var("NOVA_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup, before anything logs. A second call fails because
/// a global default is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> NovaResult<()> {
    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = (!config.json).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "tracing_subscriber".to_string(),
            value: "global default".to_string(),
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(
        service_name = config.service_name,
        json = config.json,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default_filter() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            json: true,
            ..Default::default()
        };
        // Whichever call comes first may win; the later one must error.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
