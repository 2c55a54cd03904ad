//! Gateway settings and validation.
//!
//! Settings are plain data threaded through constructors. Every field has a
//! default; `validate` is the only construction-time check allowed to abort
//! startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port for the OpenAI-compatible gateway.
pub const DEFAULT_GATEWAY_PORT: u16 = 11_435;

/// Default input-token threshold above which a model counts as large-context.
pub const DEFAULT_LARGE_CONTEXT_THRESHOLD: u32 = 100_000;

/// Gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to (0 for auto-assign).
    pub port: u16,
    /// Fixed bearer token. A random token is generated at startup when unset.
    pub api_key: Option<String>,
    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
    /// Maximum number of messages per request.
    pub max_messages: usize,
    /// Maximum characters in a single message.
    pub max_message_chars: usize,
    pub rate_limits: RateLimitSettings,
    pub discovery: DiscoverySettings,
    pub images: ImagePolicy,
    /// Seconds to wait for in-flight requests during shutdown.
    pub shutdown_grace_secs: u64,
    /// Base URL of the OpenAI-compatible upstream used by the runtime adapter.
    pub upstream_url: String,
    /// Context size assumed for upstream models that do not report one.
    pub upstream_default_context: u32,
}

/// Admission-control budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_concurrent: usize,
    pub per_minute: usize,
    pub per_hour: usize,
    pub burst_capacity: u32,
    pub burst_refill_per_sec: u32,
    /// Budget for requests that fail authentication.
    pub unauthenticated_per_minute: usize,
}

/// Discovery cadence and routing thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub interval_secs: u64,
    pub health_interval_secs: u64,
    pub large_context_threshold: u32,
}

/// What to do with image parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePolicy {
    /// Decoded size limit for inline images.
    pub max_image_bytes: usize,
    /// Hosts whose remote image URLs are referenced rather than dropped.
    pub allowed_hosts: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_GATEWAY_PORT,
            api_key: None,
            request_timeout_secs: 300,
            max_body_bytes: 10 * 1024 * 1024,
            max_messages: 1000,
            max_message_chars: 1_000_000,
            rate_limits: RateLimitSettings::default(),
            discovery: DiscoverySettings::default(),
            images: ImagePolicy::default(),
            shutdown_grace_secs: 10,
            upstream_url: "http://127.0.0.1:8080".to_string(),
            upstream_default_context: 8192,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            per_minute: 60,
            per_hour: 1000,
            burst_capacity: 10,
            burst_refill_per_sec: 2,
            unauthenticated_per_minute: 10,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            health_interval_secs: 60,
            large_context_threshold: DEFAULT_LARGE_CONTEXT_THRESHOLD,
        }
    }
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_image_bytes: 20 * 1024 * 1024,
            allowed_hosts: Vec::new(),
        }
    }
}

impl GatewaySettings {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::EmptyHost);
        }
        if let Some(key) = &self.api_key {
            if key.len() < 16 {
                return Err(SettingsError::WeakApiKey);
            }
        }
        if !(1..=3600).contains(&self.request_timeout_secs) {
            return Err(SettingsError::InvalidTimeout(self.request_timeout_secs));
        }
        if self.max_body_bytes < 1024 {
            return Err(SettingsError::InvalidBodyLimit(self.max_body_bytes));
        }
        if self.max_messages == 0 {
            return Err(SettingsError::ZeroLimit("max_messages"));
        }
        if self.max_message_chars == 0 {
            return Err(SettingsError::ZeroLimit("max_message_chars"));
        }
        self.rate_limits.validate()?;
        if self.discovery.interval_secs == 0 {
            return Err(SettingsError::ZeroLimit("discovery.interval_secs"));
        }
        if self.discovery.health_interval_secs == 0 {
            return Err(SettingsError::ZeroLimit("discovery.health_interval_secs"));
        }
        if !(self.upstream_url.starts_with("http://") || self.upstream_url.starts_with("https://")) {
            return Err(SettingsError::InvalidUpstreamUrl(self.upstream_url.clone()));
        }
        Ok(())
    }
}

impl RateLimitSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        let limits = [
            ("rate_limits.max_concurrent", self.max_concurrent),
            ("rate_limits.per_minute", self.per_minute),
            ("rate_limits.per_hour", self.per_hour),
            ("rate_limits.burst_capacity", self.burst_capacity as usize),
            ("rate_limits.burst_refill_per_sec", self.burst_refill_per_sec as usize),
            (
                "rate_limits.unauthenticated_per_minute",
                self.unauthenticated_per_minute,
            ),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(SettingsError::ZeroLimit(name));
            }
        }
        if self.per_hour < self.per_minute {
            return Err(SettingsError::InconsistentRateLimits {
                per_minute: self.per_minute,
                per_hour: self.per_hour,
            });
        }
        Ok(())
    }
}

/// Settings validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Host must not be empty")]
    EmptyHost,

    #[error("API key must be at least 16 characters")]
    WeakApiKey,

    #[error("Request timeout must be between 1 and 3600 seconds, got {0}")]
    InvalidTimeout(u64),

    #[error("Body limit must be at least 1024 bytes, got {0}")]
    InvalidBodyLimit(usize),

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("Hourly limit ({per_hour}) must not be below the per-minute limit ({per_minute})")]
    InconsistentRateLimits { per_minute: usize, per_hour: usize },

    #[error("Upstream URL must start with http:// or https://, got '{0}'")]
    InvalidUpstreamUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(GatewaySettings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: GatewaySettings =
            serde_json::from_str(r#"{"port": 9000, "rate_limits": {"per_minute": 5}}"#).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.rate_limits.per_minute, 5);
        assert_eq!(settings.rate_limits.per_hour, 1000);
        assert_eq!(settings.max_messages, 1000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut settings = GatewaySettings {
            request_timeout_secs: 0,
            ..GatewaySettings::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::InvalidTimeout(0)));

        settings.request_timeout_secs = 30;
        settings.rate_limits.per_hour = 10;
        settings.rate_limits.per_minute = 20;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InconsistentRateLimits { .. })
        ));

        settings.rate_limits = RateLimitSettings::default();
        settings.api_key = Some("short".to_string());
        assert_eq!(settings.validate(), Err(SettingsError::WeakApiKey));
    }
}
