//! # micro-server HTTP
//!
//! Listener factory, router facade and the server lifecycle.
//!
//! - [`listener`]: binds `host:port` TCP endpoints and `\\`-prefixed local
//!   channels.
//! - [`router`]: gorilla-style route registration and dispatch.
//! - [`routes`]: `/healthz/liveness`, `/healthz/readiness` and `/metrics`.
//! - [`lifecycle`]: `Idle → Running → ShuttingDown → Stopped` with a bounded
//!   graceful drain.
//! - [`shutdown`]: cancellation driven by process signals.
//!
//! ## Example
//!
//! ```rust,no_run
//! use micro_server_http::{shutdown::cancel_on_termination, Server, ServerOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new_monitoring(":8080", ServerOptions::default(), None, None, None)?;
//!
//!     let (cancel, release) = cancel_on_termination(&CancellationToken::new())?;
//!     let result = server.run(&cancel).await;
//!     release.release().await;
//!     result?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod health;
pub mod hooks;
pub mod lifecycle;
pub mod listener;
pub mod options;
pub mod router;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use error::{ListenerError, ServerError, ServerResult};
pub use health::{ReadinessCheck, ReadinessStatus};
pub use hooks::{DisabledHook, HeaderReplication, RequestTracing, RouteHook};
pub use lifecycle::{Controller, LifecycleState};
pub use listener::{resolve, ListenAddr, Listener};
pub use options::{ServerOptions, ServerOptionsBuilder};
pub use router::{PathParams, Route, RouteTable, Router, Scope};
pub use routes::{add_healthz, add_metrics};
pub use server::{Server, ServerBuilder};
pub use shutdown::{cancel_on_termination, link_to_signals, Signal, SignalRelease};
