//! # micro-server middleware
//!
//! Handler abstraction and the fixed middleware composition applied to every
//! micro-server router.
//!
//! ## Composition
//!
//! ```text
//! Request → Cors → MethodOverride → Handler
//!    ↑         │
//!    └─────────┘ preflight answered without calling the handler
//! ```
//!
//! | Stage | Middleware      | Purpose                                        |
//! |-------|-----------------|------------------------------------------------|
//! | 1     | CORS            | Any origin, credentials, `GET PUT POST DELETE OPTIONS HEAD PATCH` |
//! | 2     | Method override | `POST` + `_method` / `X-HTTP-Method-Override` → `PUT`/`PATCH`/`DELETE` |
//!
//! ## Example
//!
//! ```
//! use micro_server_middleware::pipeline::Stage;
//! use micro_server_middleware::{compose, CompositionPolicy, StatusOk};
//!
//! let stages = Stage::all();
//! assert_eq!(stages[0].name(), "cors");
//! assert_eq!(stages[1].name(), "method_override");
//!
//! let handler = compose(StatusOk::boxed(), &CompositionPolicy::default());
//! # let _ = handler;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod handler;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use context::MiddlewareContext;
pub use handler::{BoxHandler, Handler, StatusOk};
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{compose, CompositionPolicy, Pipeline, PipelineBuilder, Stage};
pub use types::{Request, Response, ResponseExt};
