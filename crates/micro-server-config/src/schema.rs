//! Configuration schema types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Graceful shutdown window used when none (or a non-positive one) is configured.
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(5);

/// Root configuration for a micro-server process.
///
/// # Example
///
/// ```
/// use micro_server_config::MicroServerConfig;
///
/// let config = MicroServerConfig::default();
/// assert_eq!(config.server.endpoint, ":8080");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MicroServerConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSettings,
}

impl MicroServerConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()
    }
}

/// Server section.
///
/// ```toml
/// [server]
/// endpoint = ":8080"
/// graceful_timeout_ms = 5000
/// enable_profiling = false
/// enable_tracing = false
/// enable_replication = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Listen endpoint: `host:port`, or a `\\`-prefixed local channel path.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Graceful shutdown window in milliseconds. Zero or negative means default.
    #[serde(default = "default_graceful_timeout_ms")]
    pub graceful_timeout_ms: i64,

    /// Reserved debug surface. Stored and reported only.
    #[serde(default)]
    pub enable_profiling: bool,

    /// Enables per-route request tracing.
    #[serde(default)]
    pub enable_tracing: bool,

    /// Enables request header replication onto responses.
    #[serde(default)]
    pub enable_replication: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            graceful_timeout_ms: default_graceful_timeout_ms(),
            enable_profiling: false,
            enable_tracing: false,
            enable_replication: false,
        }
    }
}

impl ServerSettings {
    /// The effective graceful timeout.
    pub fn graceful_timeout(&self) -> Duration {
        u64::try_from(self.graceful_timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map_or(DEFAULT_GRACEFUL_TIMEOUT, Duration::from_millis)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "server.endpoint",
                "must not be blank",
            ));
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    ":8080".to_string()
}

fn default_graceful_timeout_ms() -> i64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_settings_default() {
        let settings = ServerSettings::default();
        assert_eq!(settings.endpoint, ":8080");
        assert_eq!(settings.graceful_timeout(), Duration::from_secs(5));
        assert!(!settings.enable_profiling);
        assert!(!settings.enable_tracing);
        assert!(!settings.enable_replication);
    }

    #[test]
    fn test_non_positive_timeout_uses_default() {
        let mut settings = ServerSettings {
            graceful_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(settings.graceful_timeout(), DEFAULT_GRACEFUL_TIMEOUT);

        settings.graceful_timeout_ms = -250;
        assert_eq!(settings.graceful_timeout(), DEFAULT_GRACEFUL_TIMEOUT);

        settings.graceful_timeout_ms = 50;
        assert_eq!(settings.graceful_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_server_settings_deserialize_partial() {
        let toml = r#"
            endpoint = "127.0.0.1:3000"
            enable_tracing = true
        "#;
        let settings: ServerSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.endpoint, "127.0.0.1:3000");
        assert!(settings.enable_tracing);
        assert_eq!(settings.graceful_timeout_ms, 5000);
    }

    #[test]
    fn test_server_settings_unknown_field_rejected() {
        let toml = r#"
            endpoint = ":8080"
            max_connections = 10
        "#;
        let result: Result<ServerSettings, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_endpoint_fails_validation() {
        let config = MicroServerConfig {
            server: ServerSettings {
                endpoint: "   ".to_string(),
                ..Default::default()
            },
        };
        assert!(config.validate().is_err());
    }
}
