//! Telemetry configuration.

use micro_server_config::ProcessConfig;

use crate::logging::LogConfig;
use crate::tracing::JaegerSettings;

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Application name, used as the default tracing service name.
    pub app_name: String,

    /// Logging configuration.
    pub logging: LogConfig,

    /// Whether to install the global Prometheus recorder.
    pub metrics: bool,

    /// Tracing exporter settings. `None` leaves tracing off.
    pub tracing: Option<JaegerSettings>,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder(app_name: &str) -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new(app_name)
    }

    /// Logging preset for `process` with `USGO_LOG_LEVEL` applied, metrics
    /// on, tracing off.
    #[must_use]
    pub fn for_process(app_name: &str, process: &ProcessConfig) -> Self {
        Self::builder(app_name)
            .logging(LogConfig::for_process(process).with_env_override())
            .build()
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug)]
pub struct TelemetryConfigBuilder {
    app_name: String,
    logging: Option<LogConfig>,
    metrics: bool,
    tracing: Option<JaegerSettings>,
}

impl TelemetryConfigBuilder {
    /// Creates a builder with metrics on and tracing off.
    #[must_use]
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            logging: None,
            metrics: true,
            tracing: None,
        }
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Turns the global metrics recorder on or off.
    #[must_use]
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    /// Enables tracing with explicit settings.
    #[must_use]
    pub fn tracing(mut self, settings: JaegerSettings) -> Self {
        self.tracing = Some(settings);
        self
    }

    /// Enables tracing with settings read from the environment.
    #[must_use]
    pub fn tracing_from_env(mut self) -> Self {
        self.tracing = Some(JaegerSettings::from_env(&self.app_name));
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        TelemetryConfig {
            logging: self.logging.unwrap_or_default(),
            app_name: self.app_name,
            metrics: self.metrics,
            tracing: self.tracing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    #[test]
    fn test_builder_defaults() {
        let config = TelemetryConfig::builder("sample").build();
        assert_eq!(config.app_name, "sample");
        assert!(config.metrics);
        assert!(config.tracing.is_none());
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_builder_overrides() {
        let settings = crate::tracing::JaegerSettings::from_lookup("sample", |_| None);
        let config = TelemetryConfig::builder("sample")
            .logging(LogConfig::development())
            .metrics(false)
            .tracing(settings.clone())
            .build();

        assert!(!config.metrics);
        assert_eq!(config.tracing, Some(settings));
        assert_eq!(config.logging.format, LogFormat::Console);
    }

    #[test]
    fn test_for_process_development() {
        let config = TelemetryConfig::for_process("sample", &ProcessConfig::new(false, "laptop"));
        assert_eq!(config.logging.format, LogFormat::Console);
        assert!(config.metrics);
    }
}
