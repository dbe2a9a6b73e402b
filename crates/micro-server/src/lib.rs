//! # micro-server
//!
//! Bootstrapping library for HTTP backend services. It wires together a
//! listener, a router with health and metrics routes, CORS and method
//! override defaults, graceful shutdown, structured logging, and the
//! Prometheus and tracing exporters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use micro_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let process = ProcessConfig::from_env();
//!     let _telemetry = init_telemetry(TelemetryConfig::for_process("sample", &process))?;
//!
//!     let server = Server::builder(":8080")
//!         .process(process)
//!         .monitoring(None, None, Some(MetricsExporter::install()?))
//!         .build()?;
//!
//!     let (cancel, release) = cancel_on_termination(&CancellationToken::new())?;
//!     let result = server.run(&cancel).await;
//!     release.release().await;
//!     result?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request path
//!
//! ```text
//! Listener → CORS → MethodOverride → Router → Replication → Tracing → Handler
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub use micro_server_config as config;
pub use micro_server_http as http;
pub use micro_server_middleware as middleware;
pub use micro_server_telemetry as telemetry;

pub use tokio_util::sync::CancellationToken;

/// Common imports.
///
/// ```rust
/// use micro_server::prelude::*;
/// ```
pub mod prelude {
    pub use micro_server_config::{
        ConfigError, ConfigLoader, MicroServerConfig, ProcessConfig, ServerSettings,
    };

    pub use micro_server_http::{
        add_healthz, add_metrics, cancel_on_termination, link_to_signals, LifecycleState,
        ListenAddr, ReadinessCheck, Router, Server, ServerBuilder, ServerError, ServerOptions,
        ServerResult, Signal, SignalRelease,
    };

    pub use micro_server_middleware::{
        compose, BoxHandler, CompositionPolicy, Handler, Request, Response, ResponseExt, StatusOk,
    };

    pub use micro_server_telemetry::{
        init_telemetry, JaegerSettings, MetricsExporter, TelemetryConfig, TelemetryError,
    };

    pub use tokio_util::sync::CancellationToken;
}
