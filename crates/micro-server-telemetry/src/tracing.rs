//! Distributed tracing exporter registration.
//!
//! Deployment configures the tracing backend through Jaeger-style
//! environment variables:
//!
//! - `JAEGER_SERVICE_NAME`: service name reported on every span.
//! - `JAEGER_COLLECTOR_HOST`: collector host. Takes precedence over the agent.
//! - `JAEGER_AGENT_HOST`: agent host, `localhost` when unset.
//!
//! Spans are shipped over OTLP/gRPC to port 4317 of the resolved host, which
//! Jaeger accepts natively.
//!
//! # Example
//!
//! ```rust,ignore
//! use micro_server_telemetry::tracing::{register_jaeger_exporter, JaegerSettings};
//!
//! let settings = JaegerSettings::from_env("sample");
//! let _guard = register_jaeger_exporter(&settings)?;
//! ```

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Service name variable.
pub const SERVICE_NAME_ENV: &str = "JAEGER_SERVICE_NAME";
/// Collector host variable.
pub const COLLECTOR_HOST_ENV: &str = "JAEGER_COLLECTOR_HOST";
/// Agent host variable.
pub const AGENT_HOST_ENV: &str = "JAEGER_AGENT_HOST";

const COLLECTOR_PORT: u16 = 14268;
const COLLECTOR_PATH: &str = "/api/traces";
const AGENT_PORT: u16 = 6831;
const OTLP_GRPC_PORT: u16 = 4317;

/// Where spans are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JaegerEndpoint {
    /// A Jaeger collector.
    Collector {
        /// Collector host.
        host: String,
    },
    /// A Jaeger agent.
    Agent {
        /// Agent host.
        host: String,
    },
}

impl JaegerEndpoint {
    /// The backend host.
    pub fn host(&self) -> &str {
        match self {
            Self::Collector { host } | Self::Agent { host } => host,
        }
    }

    /// The classic Jaeger address: collector URL or agent `host:port`.
    pub fn jaeger_address(&self) -> String {
        match self {
            Self::Collector { host } => format!("http://{host}:{COLLECTOR_PORT}{COLLECTOR_PATH}"),
            Self::Agent { host } => format!("{host}:{AGENT_PORT}"),
        }
    }

    /// The OTLP/gRPC endpoint on the same host.
    pub fn otlp_endpoint(&self) -> String {
        format!("http://{}:{OTLP_GRPC_PORT}", self.host())
    }
}

/// Exporter settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JaegerSettings {
    /// Service name attached to the trace resource.
    pub service_name: String,
    /// Backend endpoint.
    pub endpoint: JaegerEndpoint,
}

impl JaegerSettings {
    /// Reads the process environment.
    #[must_use]
    pub fn from_env(default_service_name: &str) -> Self {
        Self::from_lookup(default_service_name, |key| std::env::var(key).ok())
    }

    /// Reads an arbitrary lookup. Every missing variable is logged at info.
    pub fn from_lookup<F>(default_service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let service_name = non_empty(SERVICE_NAME_ENV).unwrap_or_else(|| {
            tracing::info!(
                default = default_service_name,
                "JAEGER_SERVICE_NAME not defined, using default service name"
            );
            default_service_name.to_string()
        });

        let endpoint = if let Some(host) = non_empty(COLLECTOR_HOST_ENV) {
            JaegerEndpoint::Collector { host }
        } else {
            tracing::info!("JAEGER_COLLECTOR_HOST not defined, using the agent endpoint instead");
            let host = non_empty(AGENT_HOST_ENV).unwrap_or_else(|| {
                tracing::info!("JAEGER_AGENT_HOST not defined, using default agent host");
                "localhost".to_string()
            });
            JaegerEndpoint::Agent { host }
        };

        Self {
            service_name,
            endpoint,
        }
    }
}

/// Keeps the tracer provider alive; flushes and shuts it down on drop.
#[derive(Debug)]
pub struct TracingGuard {
    provider: Option<TracerProvider>,
}

impl TracingGuard {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: TracerProvider) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// A guard owning nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    /// Whether a provider is attached.
    pub fn is_active(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    eprintln!("Error flushing tracer provider: {e}");
                }
            }
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {e}");
            }
        }
    }
}

/// Builds the OTLP exporter for `settings` and installs it as the global
/// tracer provider.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::TracingInit` if the exporter cannot be built.
pub fn register_jaeger_exporter(settings: &JaegerSettings) -> TelemetryResult<TracingGuard> {
    let resource = Resource::new([KeyValue::new(
        opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
        settings.service_name.clone(),
    )]);

    let otlp_endpoint = settings.endpoint.otlp_endpoint();
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
        .map_err(|e| {
            tracing::info!(error = %e, "Failed to retrieve Jaeger tracing exporter");
            TelemetryError::TracingInit(e.to_string())
        })?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    tracing::info!(
        service_name = %settings.service_name,
        jaeger_endpoint = %settings.endpoint.jaeger_address(),
        otlp_endpoint = %otlp_endpoint,
        "Registered Jaeger exporter"
    );

    Ok(TracingGuard::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn test_defaults_to_local_agent() {
        let settings = JaegerSettings::from_lookup("sample", lookup(&[]));
        assert_eq!(settings.service_name, "sample");
        assert_eq!(
            settings.endpoint,
            JaegerEndpoint::Agent {
                host: "localhost".to_string()
            }
        );
        assert_eq!(settings.endpoint.jaeger_address(), "localhost:6831");
        assert_eq!(settings.endpoint.otlp_endpoint(), "http://localhost:4317");
    }

    #[test]
    fn test_collector_wins_over_agent() {
        let settings = JaegerSettings::from_lookup(
            "sample",
            lookup(&[
                ("JAEGER_SERVICE_NAME", "orders"),
                ("JAEGER_COLLECTOR_HOST", "jaeger-collector"),
                ("JAEGER_AGENT_HOST", "jaeger-agent"),
            ]),
        );
        assert_eq!(settings.service_name, "orders");
        assert_eq!(
            settings.endpoint.jaeger_address(),
            "http://jaeger-collector:14268/api/traces"
        );
        assert_eq!(
            settings.endpoint.otlp_endpoint(),
            "http://jaeger-collector:4317"
        );
    }

    #[test]
    fn test_agent_host() {
        let settings =
            JaegerSettings::from_lookup("sample", lookup(&[("JAEGER_AGENT_HOST", "10.0.0.7")]));
        assert_eq!(settings.endpoint.host(), "10.0.0.7");
        assert_eq!(settings.endpoint.jaeger_address(), "10.0.0.7:6831");
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let settings = JaegerSettings::from_lookup(
            "sample",
            lookup(&[("JAEGER_SERVICE_NAME", " "), ("JAEGER_COLLECTOR_HOST", "")]),
        );
        assert_eq!(settings.service_name, "sample");
        assert!(matches!(settings.endpoint, JaegerEndpoint::Agent { .. }));
    }

    #[test]
    fn test_disabled_guard_drops_cleanly() {
        let guard = TracingGuard::disabled();
        assert!(!guard.is_active());
        drop(guard);
    }
}
