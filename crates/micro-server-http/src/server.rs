//! HTTP server.
//!
//! A [`Server`] binds its listener at construction, collects routes on its
//! [`Router`], and serves them when [`Server::run`] is awaited. Every route
//! is decorated by the tracing and replication hooks, and the resulting
//! table is wrapped with CORS and method override.
//!
//! # Example
//!
//! ```rust,no_run
//! use micro_server_http::{Server, ServerOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new_monitoring(":8080", ServerOptions::default(), None, None, None)?;
//!
//!     let cancel = CancellationToken::new();
//!     server.run(&cancel).await?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use micro_server_config::ProcessConfig;
use micro_server_middleware::{compose, BoxHandler, CompositionPolicy};
use micro_server_telemetry::{JaegerSettings, MetricsExporter};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, ServerResult};
use crate::hooks::{DisabledHook, HeaderReplication, RequestTracing, RouteHook};
use crate::lifecycle::{Controller, LifecycleState};
use crate::listener::{ListenAddr, Listener};
use crate::options::ServerOptions;
use crate::router::Router;
use crate::routes::{add_healthz, add_metrics};

/// Service name used for span export when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "micro-server";

/// An HTTP server bound to one endpoint.
pub struct Server {
    endpoint: String,
    local_addr: ListenAddr,
    server_url: String,
    options: ServerOptions,
    router: Router,
    controller: Controller,
    composition: CompositionPolicy,
    tracing_hook: Box<dyn RouteHook>,
    replication_hook: Box<dyn RouteHook>,
}

impl Server {
    /// Creates a server builder for `endpoint`.
    #[must_use]
    pub fn builder(endpoint: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(endpoint)
    }

    /// Binds `endpoint` and creates a server with an empty router.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listener`] if the endpoint cannot be bound.
    pub fn new_base(endpoint: &str, options: ServerOptions) -> ServerResult<Self> {
        Self::builder(endpoint).options(options).build()
    }

    /// Binds `endpoint` and registers the health routes, plus `GET /metrics`
    /// when `metrics` is given.
    ///
    /// A missing liveness or readiness handler answers `200 ok`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listener`] if the endpoint cannot be bound.
    pub fn new_monitoring(
        endpoint: &str,
        options: ServerOptions,
        liveness: Option<BoxHandler>,
        readiness: Option<BoxHandler>,
        metrics: Option<MetricsExporter>,
    ) -> ServerResult<Self> {
        Self::builder(endpoint)
            .options(options)
            .monitoring(liveness, readiness, metrics)
            .build()
    }

    /// The router. Routes added after `run` starts are not served.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Mutable access to the router.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// The endpoint the server was created with.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> &ListenAddr {
        &self.local_addr
    }

    /// Base URL clients can use, e.g. `http://localhost:8080`.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// The server options.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Receiver notified on every lifecycle state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.controller.subscribe()
    }

    /// Whether requests are traced.
    #[must_use]
    pub fn is_tracing_enabled(&self) -> bool {
        self.tracing_hook.is_enabled()
    }

    /// Whether request headers are replicated onto responses.
    #[must_use]
    pub fn is_replicating_enabled(&self) -> bool {
        self.replication_hook.is_enabled()
    }

    /// Whether profiling was requested. No debug surface is served.
    #[must_use]
    pub fn is_profiling_enabled(&self) -> bool {
        self.options.profiling_enabled()
    }

    /// Upper bound on the shutdown drain.
    #[must_use]
    pub fn graceful_timeout(&self) -> Duration {
        self.controller.graceful_timeout()
    }

    /// Serves the registered routes until `cancel` fires or
    /// [`shutdown`](Self::shutdown) is called.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] if a run is active.
    /// - [`ServerError::ListenerNotInitialized`] after the server stopped.
    /// - [`ServerError::MissingPathTemplate`] if a route has no template.
    /// - [`ServerError::Accept`] if the listener fails.
    pub async fn run(&self, cancel: &CancellationToken) -> ServerResult<()> {
        tracing::info!(endpoint = %self.endpoint, url = %self.server_url, "Starting the HTTP server");

        let result = self.serve(cancel).await;
        match &result {
            Ok(()) => tracing::info!(endpoint = %self.endpoint, "Stopped the HTTP server"),
            Err(e) => tracing::error!(endpoint = %self.endpoint, error = %e, "Failed to run the HTTP server"),
        }
        result
    }

    async fn serve(&self, cancel: &CancellationToken) -> ServerResult<()> {
        if matches!(
            self.state(),
            LifecycleState::Running | LifecycleState::ShuttingDown
        ) {
            return Err(ServerError::AlreadyRunning);
        }

        self.router.walk(|index, route| {
            let template = route
                .path_template()
                .ok_or(ServerError::MissingPathTemplate { index })?;
            let methods = if route.allowed_methods().is_empty() {
                "ANY".to_string()
            } else {
                route
                    .allowed_methods()
                    .iter()
                    .map(http::Method::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
            };
            tracing::info!(
                url = %format!("{}{}", self.server_url, template),
                methods = %methods,
                "Exposed Route"
            );
            Ok::<(), ServerError>(())
        })?;

        let table = self.router.compile(|template, handler| {
            let handler = self.tracing_hook.decorate(template, handler);
            self.replication_hook.decorate(template, handler)
        });
        let handler = compose(Arc::new(table), &self.composition);

        self.controller.run(cancel, handler).await
    }

    /// Stops the server.
    ///
    /// A running server drains and this waits until it stops. An idle
    /// server releases its listener. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Reserved for close failures; none are currently reported.
    pub async fn shutdown(&self) -> ServerResult<()> {
        self.controller.shutdown().await
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("server_url", &self.server_url)
            .field("options", &self.options)
            .field("routes", &self.router.len())
            .field("state", &self.state())
            .field("tracing", &self.tracing_hook.name())
            .field("replication", &self.replication_hook.name())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Server`].
///
/// ```rust
/// use micro_server_config::ProcessConfig;
/// use micro_server_http::{Server, ServerOptions};
///
/// let server = Server::builder("127.0.0.1:0")
///     .options(ServerOptions::default())
///     .process(ProcessConfig::development())
///     .build()
///     .unwrap();
///
/// assert!(server.server_url().starts_with("http://127.0.0.1:"));
/// ```
pub struct ServerBuilder {
    endpoint: String,
    options: ServerOptions,
    process: Option<ProcessConfig>,
    service_name: String,
    composition: CompositionPolicy,
    tracing_hook: Option<Box<dyn RouteHook>>,
    replication_hook: Option<Box<dyn RouteHook>>,
    monitoring: Option<Monitoring>,
}

struct Monitoring {
    liveness: Option<BoxHandler>,
    readiness: Option<BoxHandler>,
    metrics: Option<MetricsExporter>,
}

impl ServerBuilder {
    /// Starts a builder for `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            options: ServerOptions::default(),
            process: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            composition: CompositionPolicy::default(),
            tracing_hook: None,
            replication_hook: None,
            monitoring: None,
        }
    }

    /// Sets the server options.
    #[must_use]
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the process configuration used for the server URL.
    ///
    /// Defaults to [`ProcessConfig::global`].
    #[must_use]
    pub fn process(mut self, process: ProcessConfig) -> Self {
        self.process = Some(process);
        self
    }

    /// Service name reported by exported spans.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Replaces the CORS and method override settings.
    #[must_use]
    pub fn composition(mut self, policy: CompositionPolicy) -> Self {
        self.composition = policy;
        self
    }

    /// Replaces the tracing hook chosen from the options.
    #[must_use]
    pub fn tracing_hook(mut self, hook: impl RouteHook) -> Self {
        self.tracing_hook = Some(Box::new(hook));
        self
    }

    /// Replaces the replication hook chosen from the options.
    #[must_use]
    pub fn replication_hook(mut self, hook: impl RouteHook) -> Self {
        self.replication_hook = Some(Box::new(hook));
        self
    }

    /// Registers the health routes and, with an exporter, `GET /metrics`.
    #[must_use]
    pub fn monitoring(
        mut self,
        liveness: Option<BoxHandler>,
        readiness: Option<BoxHandler>,
        metrics: Option<MetricsExporter>,
    ) -> Self {
        self.monitoring = Some(Monitoring {
            liveness,
            readiness,
            metrics,
        });
        self
    }

    /// Binds the listener and builds the server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listener`] if the endpoint cannot be bound.
    pub fn build(self) -> ServerResult<Server> {
        let listener = Listener::resolve(&self.endpoint)?;
        let local_addr = listener.local_addr()?;
        let process = self.process.unwrap_or_else(|| ProcessConfig::global().clone());
        let server_url = format!("http://{}", process.resolve_hostname(&local_addr.to_string()));

        let options = self.options;
        let tracing_hook: Box<dyn RouteHook> = match self.tracing_hook {
            Some(hook) => hook,
            None if options.tracing_enabled() => Box::new(RequestTracing::register(
                &JaegerSettings::from_env(&self.service_name),
            )),
            None => Box::new(DisabledHook),
        };
        let replication_hook: Box<dyn RouteHook> = match self.replication_hook {
            Some(hook) => hook,
            None if options.replication_enabled() => Box::new(HeaderReplication::default()),
            None => Box::new(DisabledHook),
        };

        if options.profiling_enabled() {
            tracing::info!(endpoint = %self.endpoint, "profiling requested; no debug surface is served");
        }

        let mut router = Router::new();
        if let Some(monitoring) = self.monitoring {
            add_healthz(&mut router, monitoring.liveness, monitoring.readiness);
            if let Some(exporter) = monitoring.metrics {
                add_metrics(&mut router, exporter);
            }
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            local_addr = %local_addr,
            url = %server_url,
            tracing = tracing_hook.is_enabled(),
            replication = replication_hook.is_enabled(),
            "created HTTP server"
        );

        Ok(Server {
            endpoint: self.endpoint,
            local_addr,
            server_url,
            options,
            router,
            controller: Controller::new(listener, options.graceful_timeout()),
            composition: self.composition,
            tracing_hook,
            replication_hook,
        })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("endpoint", &self.endpoint)
            .field("options", &self.options)
            .field("service_name", &self.service_name)
            .field("monitoring", &self.monitoring.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{LIVENESS_PATH, METRICS_PATH, READINESS_PATH};
    use micro_server_middleware::StatusOk;

    fn templates(server: &Server) -> Vec<String> {
        let mut out = Vec::new();
        server
            .router()
            .walk(|_, route| {
                out.push(route.path_template().unwrap_or_default().to_string());
                Ok::<_, ()>(())
            })
            .unwrap();
        out
    }

    #[test]
    fn test_new_base_has_empty_router() {
        let server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();

        assert!(server.router().is_empty());
        assert_eq!(server.state(), LifecycleState::Idle);
        assert_eq!(server.graceful_timeout(), Duration::from_secs(5));
        assert!(!server.is_tracing_enabled());
        assert!(!server.is_replicating_enabled());
        assert!(!server.is_profiling_enabled());
    }

    #[test]
    fn test_new_base_invalid_endpoint() {
        let err = Server::new_base("not-an-address", ServerOptions::default()).unwrap_err();
        assert!(matches!(err, ServerError::Listener(_)));
    }

    #[test]
    fn test_new_monitoring_routes() {
        let server =
            Server::new_monitoring("127.0.0.1:0", ServerOptions::default(), None, None, None)
                .unwrap();
        assert_eq!(templates(&server), vec![LIVENESS_PATH, READINESS_PATH]);

        let (exporter, _recorder) = MetricsExporter::unregistered().unwrap();
        let server = Server::new_monitoring(
            "127.0.0.1:0",
            ServerOptions::default(),
            Some(StatusOk::boxed()),
            None,
            Some(exporter),
        )
        .unwrap();
        assert_eq!(
            templates(&server),
            vec![LIVENESS_PATH, READINESS_PATH, METRICS_PATH]
        );
    }

    #[test]
    fn test_server_url_uses_local_host_in_development() {
        let server = Server::builder(":0")
            .process(ProcessConfig::new(false, "pod-1"))
            .build()
            .unwrap();

        let ListenAddr::Tcp(addr) = server.local_addr() else {
            panic!("expected TCP address");
        };
        assert_eq!(
            server.server_url(),
            format!("http://localhost:{}", addr.port())
        );
    }

    #[test]
    fn test_server_url_uses_hostname_in_production() {
        let server = Server::builder(":0")
            .process(ProcessConfig::new(true, "pod-1"))
            .build()
            .unwrap();

        assert!(server.server_url().starts_with("http://pod-1:"));
    }

    #[test]
    fn test_replication_follows_options() {
        let options = ServerOptions::builder().enable_replication(true).build();
        let server = Server::new_base("127.0.0.1:0", options).unwrap();
        assert!(server.is_replicating_enabled());
    }

    #[test]
    fn test_injected_tracing_hook() {
        let server = Server::builder("127.0.0.1:0")
            .tracing_hook(RequestTracing::local())
            .build()
            .unwrap();
        assert!(server.is_tracing_enabled());
    }

    #[tokio::test]
    async fn test_route_without_template_aborts_run() {
        let mut server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();
        server.router_mut().handle("/ok", StatusOk::boxed());
        server.router_mut().route();

        let err = server.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ServerError::MissingPathTemplate { index: 1 }));
        assert_eq!(server.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_is_noop() {
        let server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();

        assert_eq!(server.state(), LifecycleState::Stopped);
    }
}
