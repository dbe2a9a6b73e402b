//! Observability for micro-server processes.
//!
//! - **Logging**: `tracing-subscriber` with a development console preset and
//!   a sampled JSON production preset, driven by `USGO_LOG_LEVEL`.
//! - **Metrics**: a Prometheus recorder rendered on `GET /metrics`.
//! - **Tracing**: OTLP export configured through Jaeger-style environment
//!   variables.
//!
//! # Architecture
//!
//! ```text
//!  tracing events ──► EnvFilter ──► Sampler ──► fmt (console | json) ──► stdout
//!                          │
//!                          └──► LogCountLayer ──► micro_server_logs_total
//!
//!  metrics macros ──► PrometheusRecorder ──► MetricsExporter::render() ──► /metrics
//!
//!  request spans  ──► opentelemetry TracerProvider ──► OTLP/gRPC ──► Jaeger
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use micro_server_config::ProcessConfig;
//! use micro_server_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let process = ProcessConfig::from_env();
//!     let telemetry = init_telemetry(TelemetryConfig::for_process("sample", &process))?;
//!     let exporter = telemetry.metrics().cloned();
//!     // ...
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, parse_level, LogConfig, LogFormat, SamplingConfig};
pub use metrics::{record_request, MetricsExporter};
pub use tracing::{register_jaeger_exporter, JaegerEndpoint, JaegerSettings, TracingGuard};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Handles produced by [`init_telemetry`].
///
/// Keep it alive for the lifetime of the process; dropping it flushes the
/// tracing exporter.
#[derive(Debug)]
pub struct TelemetryGuard {
    metrics: Option<MetricsExporter>,
    tracing: TracingGuard,
}

impl TelemetryGuard {
    /// The installed metrics exporter, if metrics were enabled.
    pub fn metrics(&self) -> Option<&MetricsExporter> {
        self.metrics.as_ref()
    }

    /// Whether a tracing exporter was registered.
    pub fn is_tracing_active(&self) -> bool {
        self.tracing.is_active()
    }
}

/// Initializes logging, then metrics, then tracing.
///
/// Logging and metrics failures are returned. A tracing registration
/// failure is logged and leaves tracing off, so a missing collector never
/// blocks startup.
///
/// # Errors
///
/// Returns `TelemetryError` if logging or metrics fail to initialize.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;

    let metrics = if config.metrics {
        Some(MetricsExporter::install()?)
    } else {
        None
    };

    let tracing = match config.tracing.as_ref().map(register_jaeger_exporter) {
        Some(Ok(guard)) => guard,
        Some(Err(e)) => {
            ::tracing::warn!(error = %e, "tracing exporter unavailable, tracing disabled");
            TracingGuard::disabled()
        }
        None => TracingGuard::disabled(),
    };

    Ok(TelemetryGuard { metrics, tracing })
}
