//! Per-route hooks.
//!
//! A [`RouteHook`] decorates each route's handler once, when the server
//! compiles its route table. The server applies the tracing hook first and
//! the replication hook second, so replication wraps the traced handler.

use std::sync::Arc;
use std::time::Instant;

use http::{HeaderName, HeaderValue};
use micro_server_middleware::{BoxFuture, BoxHandler, Handler, Request, Response};
use micro_server_telemetry::{record_request, register_jaeger_exporter, JaegerSettings, TracingGuard};
use tracing::Instrument;

/// Decorates route handlers before serving begins.
pub trait RouteHook: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the hook changes anything.
    fn is_enabled(&self) -> bool;

    /// Wraps the handler registered at `template`.
    fn decorate(&self, template: &str, handler: BoxHandler) -> BoxHandler;
}

/// Hook that leaves handlers untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledHook;

impl RouteHook for DisabledHook {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn decorate(&self, _template: &str, handler: BoxHandler) -> BoxHandler {
        handler
    }
}

/// Wraps each request in an `http.request` span and records request metrics.
#[derive(Debug)]
pub struct RequestTracing {
    guard: Option<TracingGuard>,
    enabled: bool,
}

impl RequestTracing {
    /// Registers the span exporter and enables the hook.
    ///
    /// A registration failure is logged and yields a disabled hook.
    pub fn register(settings: &JaegerSettings) -> Self {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("request tracing disabled: span export needs a Tokio runtime");
            return Self::disabled();
        }
        match register_jaeger_exporter(settings) {
            Ok(guard) => Self {
                guard: Some(guard),
                enabled: true,
            },
            Err(e) => {
                tracing::warn!(error = %e, "request tracing disabled");
                Self::disabled()
            }
        }
    }

    /// Enabled without an exporter; spans only reach the log subscriber.
    #[must_use]
    pub fn local() -> Self {
        Self {
            guard: None,
            enabled: true,
        }
    }

    /// A hook that does nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            guard: None,
            enabled: false,
        }
    }

    /// Whether a span exporter is attached.
    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.guard.as_ref().is_some_and(TracingGuard::is_active)
    }
}

impl RouteHook for RequestTracing {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn decorate(&self, template: &str, handler: BoxHandler) -> BoxHandler {
        if !self.enabled {
            return handler;
        }
        Arc::new(Traced {
            route: Arc::from(template),
            inner: handler,
        })
    }
}

struct Traced {
    route: Arc<str>,
    inner: BoxHandler,
}

impl Handler for Traced {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        let route = Arc::clone(&self.route);
        let method = request.method().clone();
        let span = tracing::info_span!("http.request", route = %route, method = %method);
        let started = Instant::now();
        let response = span.in_scope(|| self.inner.call(request));

        Box::pin(async move {
            let response = response.instrument(span).await;
            record_request(
                &route,
                method.as_str(),
                response.status().as_u16(),
                started.elapsed(),
            );
            response
        })
    }
}

/// Headers copied by [`HeaderReplication::default`].
pub const DEFAULT_REPLICATED_HEADERS: [&str; 2] = ["x-request-id", "x-correlation-id"];

/// Copies selected request headers onto the response.
///
/// A header the handler already set is left alone.
#[derive(Debug, Clone)]
pub struct HeaderReplication {
    headers: Arc<[HeaderName]>,
}

impl HeaderReplication {
    /// Replicates `headers`.
    #[must_use]
    pub fn new(headers: impl IntoIterator<Item = HeaderName>) -> Self {
        Self {
            headers: headers.into_iter().collect(),
        }
    }

    /// The replicated header names.
    #[must_use]
    pub fn headers(&self) -> &[HeaderName] {
        &self.headers
    }
}

impl Default for HeaderReplication {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICATED_HEADERS.map(HeaderName::from_static))
    }
}

impl RouteHook for HeaderReplication {
    fn name(&self) -> &'static str {
        "replication"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn decorate(&self, _template: &str, handler: BoxHandler) -> BoxHandler {
        Arc::new(Replicated {
            headers: Arc::clone(&self.headers),
            inner: handler,
        })
    }
}

struct Replicated {
    headers: Arc<[HeaderName]>,
    inner: BoxHandler,
}

impl Handler for Replicated {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        let copied: Vec<(HeaderName, HeaderValue)> = self
            .headers
            .iter()
            .filter_map(|name| {
                request
                    .headers()
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        let response = self.inner.call(request);

        Box::pin(async move {
            let mut response = response.await;
            for (name, value) in copied {
                response.headers_mut().entry(name).or_insert(value);
            }
            response
        })
    }
}
