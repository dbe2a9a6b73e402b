//! Request handlers.
//!
//! A [`Handler`] turns a request into a response. Async closures implement it
//! directly, and [`compose`](crate::compose) produces one by wrapping another.
//!
//! ```
//! use std::sync::Arc;
//!
//! use micro_server_middleware::{BoxHandler, Request, Response, ResponseExt};
//! use http::StatusCode;
//!
//! let echo: BoxHandler = Arc::new(|request: Request| async move {
//!     Response::text(StatusCode::OK, request.method().to_string())
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use http::StatusCode;

use crate::middleware::BoxFuture;
use crate::types::{Request, Response, ResponseExt};

/// Something that answers requests.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn call(&self, request: Request) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        Box::pin(self(request))
    }
}

/// A shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// Answers every request with `200 ok`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOk;

impl StatusOk {
    /// The handler as a [`BoxHandler`].
    pub fn boxed() -> BoxHandler {
        Arc::new(Self)
    }
}

impl Handler for StatusOk {
    fn call(&self, _request: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { Response::text(StatusCode::OK, "ok") })
    }
}
