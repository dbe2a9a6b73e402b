//! Built-in route groups.
//!
//! | Route                    | Handler                         |
//! |--------------------------|---------------------------------|
//! | `GET /healthz/liveness`  | caller supplied, or `200 ok`    |
//! | `GET /healthz/readiness` | caller supplied, or `200 ok`    |
//! | `GET /metrics`           | Prometheus text exposition      |

use std::sync::Arc;

use http::{header, HeaderValue, Method, StatusCode};
use micro_server_middleware::{BoxFuture, BoxHandler, Handler, Request, Response, ResponseExt, StatusOk};
use micro_server_telemetry::metrics::CONTENT_TYPE;
use micro_server_telemetry::MetricsExporter;

use crate::router::Router;

/// Prefix of the health routes.
pub const HEALTHZ_PREFIX: &str = "/healthz/";

/// Liveness probe path.
pub const LIVENESS_PATH: &str = "/healthz/liveness";

/// Readiness probe path.
pub const READINESS_PATH: &str = "/healthz/readiness";

/// Metrics scrape path.
pub const METRICS_PATH: &str = "/metrics";

/// Registers `GET /healthz/liveness` and `GET /healthz/readiness`.
///
/// Either handler defaults to [`StatusOk`].
pub fn add_healthz(
    router: &mut Router,
    liveness: Option<BoxHandler>,
    readiness: Option<BoxHandler>,
) {
    let mut healthz = router.scope(HEALTHZ_PREFIX);
    healthz
        .handle("/liveness", liveness.unwrap_or_else(StatusOk::boxed))
        .methods([Method::GET]);
    healthz
        .handle("/readiness", readiness.unwrap_or_else(StatusOk::boxed))
        .methods([Method::GET]);
}

/// Registers `GET /metrics` serving `exporter`.
pub fn add_metrics(router: &mut Router, exporter: MetricsExporter) {
    router
        .handle(METRICS_PATH, Arc::new(MetricsHandler { exporter }))
        .methods([Method::GET]);
}

/// Renders the Prometheus exposition.
#[derive(Debug, Clone)]
pub struct MetricsHandler {
    exporter: MetricsExporter,
}

impl Handler for MetricsHandler {
    fn call(&self, _request: Request) -> BoxFuture<'static, Response> {
        let mut response = Response::text(StatusCode::OK, self.exporter.render());
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
        Box::pin(async move { response })
    }
}
