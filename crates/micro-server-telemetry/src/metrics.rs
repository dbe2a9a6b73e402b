//! Prometheus metrics.
//!
//! [`MetricsExporter`] owns the Prometheus handle behind `GET /metrics`.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `micro_server_requests_total` | Counter | `route`, `method`, `status` | Total requests |
//! | `micro_server_request_duration_seconds` | Histogram | `route`, `method` | Request latency |
//! | `micro_server_logs_total` | Counter | `logger_name`, `level` | Emitted log events |

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use tracing::Level;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Content type of the Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Request counter name.
pub const REQUESTS_TOTAL: &str = "micro_server_requests_total";

/// Request latency histogram name.
pub const REQUEST_DURATION_SECONDS: &str = "micro_server_request_duration_seconds";

/// Log event counter name.
pub const LOGS_TOTAL: &str = "micro_server_logs_total";

const DURATION_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static INSTALLED: Mutex<Option<MetricsExporter>> = Mutex::new(None);

/// Prometheus exporter rendering the process metrics.
#[derive(Debug, Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl MetricsExporter {
    /// Installs the global recorder, or returns the one already installed.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::MetricsInit` if another recorder owns the
    /// global slot.
    pub fn install() -> TelemetryResult<Self> {
        let mut installed = INSTALLED.lock();
        if let Some(exporter) = installed.as_ref() {
            return Ok(exporter.clone());
        }

        let handle = builder()?
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        describe_metrics();

        let exporter = Self { handle };
        *installed = Some(exporter.clone());
        tracing::debug!("installed Prometheus recorder");
        Ok(exporter)
    }

    /// Builds a recorder that is not installed globally.
    ///
    /// Record into it with [`metrics::with_local_recorder`]; the returned
    /// exporter renders what was recorded.
    pub fn unregistered() -> TelemetryResult<(Self, PrometheusRecorder)> {
        let recorder = builder()?.build_recorder();
        let exporter = Self {
            handle: recorder.handle(),
        };
        Ok((exporter, recorder))
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.run_upkeep();
        self.handle.render()
    }

    /// The underlying Prometheus handle.
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

fn builder() -> TelemetryResult<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &DURATION_BUCKETS,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total number of HTTP requests processed");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!(LOGS_TOTAL, "Number of log events emitted");
}

/// Records a completed request.
pub fn record_request(route: &str, method: &str, status_code: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        REQUEST_DURATION_SECONDS,
        "route" => route.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records one log event.
pub fn record_log(logger_name: &str, level: Level) {
    counter!(
        LOGS_TOTAL,
        "logger_name" => logger_name.to_string(),
        "level" => crate::logging::level_label(level)
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_renders() {
        let (exporter, recorder) = MetricsExporter::unregistered().unwrap();

        metrics::with_local_recorder(&recorder, || {
            record_request("/users/{id}", "GET", 200, Duration::from_millis(12));
            record_request("/users/{id}", "GET", 200, Duration::from_millis(30));
            record_request("/users/{id}", "GET", 404, Duration::from_millis(1));
        });

        let rendered = exporter.render();
        let ok_line = rendered
            .lines()
            .find(|l| l.starts_with("micro_server_requests_total{") && l.contains(r#"status="200""#))
            .unwrap();
        assert!(ok_line.contains(r#"route="/users/{id}""#));
        assert!(ok_line.contains(r#"method="GET""#));
        assert!(ok_line.ends_with(" 2"));

        assert!(rendered.contains("micro_server_request_duration_seconds_bucket"));
        assert!(rendered.contains(r#"le="0.025""#));
    }

    #[test]
    fn test_record_log_renders() {
        let (exporter, recorder) = MetricsExporter::unregistered().unwrap();

        metrics::with_local_recorder(&recorder, || {
            record_log("trace", Level::INFO);
        });

        let rendered = exporter.render();
        assert!(rendered.contains("micro_server_logs_total{"));
        assert!(rendered.contains(r#"logger_name="trace""#));
        assert!(rendered.contains(r#"level="info""#));
    }

    #[test]
    fn test_unregistered_exporters_are_independent() {
        let (first, recorder) = MetricsExporter::unregistered().unwrap();
        let (second, _other) = MetricsExporter::unregistered().unwrap();

        metrics::with_local_recorder(&recorder, || {
            record_log("sample", Level::ERROR);
        });

        assert!(first.render().contains(LOGS_TOTAL));
        assert!(!second.render().contains(LOGS_TOTAL));
    }

    #[test]
    fn test_record_without_recorder_does_not_panic() {
        record_request("/", "POST", 500, Duration::from_millis(5));
        record_log("sample", Level::DEBUG);
    }
}
