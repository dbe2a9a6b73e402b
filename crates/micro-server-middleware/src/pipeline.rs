//! Fixed-order handler composition.
//!
//! [`compose`] wraps a base handler with the CORS stage on the outside and
//! the method override stage inside it:
//!
//! ```text
//! Request → Cors → MethodOverride → base handler
//!              ↓ (preflight answered here)
//! ```
//!
//! CORS sits outermost so preflight requests are answered before the
//! override logic looks at the request.

use crate::context::MiddlewareContext;
use crate::handler::{BoxHandler, Handler};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::{CorsMiddleware, MethodOverrideMiddleware};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Middleware wrapped around a handler.
///
/// A pipeline is immutable once built and is itself a [`Handler`], so it can
/// be shared across connections.
///
/// # Example
///
/// ```
/// use micro_server_middleware::pipeline::Pipeline;
/// use micro_server_middleware::stages::MethodOverrideMiddleware;
/// use micro_server_middleware::StatusOk;
///
/// let pipeline = Pipeline::builder()
///     .stage(MethodOverrideMiddleware::new())
///     .build(StatusOk::boxed());
/// assert_eq!(pipeline.stage_names(), vec!["method_override"]);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[BoxedMiddleware]>,
    handler: BoxHandler,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs a request through every stage and then the handler.
    pub async fn process(&self, request: Request) -> Response {
        let mut ctx = MiddlewareContext::new();
        let handler = Arc::clone(&self.handler);
        let next = self.build_chain(move |_ctx, request| handler.call(request));
        next.run(&mut ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all middleware stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of middleware stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

impl Handler for Pipeline {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        let pipeline = self.clone();
        Box::pin(async move { pipeline.process(request).await })
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage. Earlier stages wrap later ones.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Wraps `handler` with the stages added so far.
    #[must_use]
    pub fn build(self, handler: BoxHandler) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
            handler,
        }
    }
}

/// The stages [`compose`] applies, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: CORS
    Cors = 1,
    /// Stage 2: HTTP method override
    MethodOverride = 2,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cors => "cors",
            Self::MethodOverride => "method_override",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Self; 2] {
        [Self::Cors, Self::MethodOverride]
    }
}

/// Settings for the stages applied by [`compose`].
#[derive(Debug, Clone)]
pub struct CompositionPolicy {
    cors: CorsMiddleware,
    method_override: MethodOverrideMiddleware,
}

impl CompositionPolicy {
    /// Replaces the CORS stage.
    #[must_use]
    pub fn with_cors(mut self, cors: CorsMiddleware) -> Self {
        self.cors = cors;
        self
    }

    /// The CORS stage.
    pub fn cors(&self) -> &CorsMiddleware {
        &self.cors
    }
}

impl Default for CompositionPolicy {
    fn default() -> Self {
        Self {
            cors: CorsMiddleware::default_policy(),
            method_override: MethodOverrideMiddleware::new(),
        }
    }
}

/// Wraps `base` with CORS and then method override, in [`Stage::all`] order.
///
/// The result holds no mutable state; composing the same handler twice gives
/// handlers that behave identically.
#[must_use]
pub fn compose(base: BoxHandler, policy: &CompositionPolicy) -> BoxHandler {
    let pipeline = Pipeline::builder()
        .stage(policy.cors.clone())
        .stage(policy.method_override)
        .build(base);
    Arc::new(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::cors::headers;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::{Method, Request as HttpRequest, StatusCode};
    use http_body_util::{BodyExt, Full};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OrderTrackingMiddleware {
        name: &'static str,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Middleware for OrderTrackingMiddleware {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.order.lock().unwrap().push(self.name);
                next.run(ctx, request).await
            })
        }
    }

    fn echo_method() -> BoxHandler {
        Arc::new(|request: Request| async move {
            Response::text(StatusCode::OK, request.method().to_string())
        })
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_executes_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .stage(OrderTrackingMiddleware {
                name: "first",
                order: order.clone(),
            })
            .stage(OrderTrackingMiddleware {
                name: "second",
                order: order.clone(),
            })
            .build(crate::handler::StatusOk::boxed());

        let request: Request = HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = pipeline.process(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(pipeline.stage_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let pipeline = Pipeline::builder().build(echo_method());

        let request: Request = HttpRequest::builder()
            .method(Method::PUT)
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = pipeline.call(request).await;
        assert_eq!(body_text(response).await, "PUT");
    }

    #[test]
    fn test_stage_order() {
        let stages = Stage::all();
        assert_eq!(stages[0].name(), "cors");
        assert_eq!(stages[1].name(), "method_override");
        assert!(stages[0] < stages[1]);
    }

    #[test]
    fn test_compose_stage_order_matches() {
        let policy = CompositionPolicy::default();
        let pipeline = Pipeline::builder()
            .stage(policy.cors().clone())
            .stage(MethodOverrideMiddleware::new())
            .build(echo_method());
        let expected: Vec<_> = Stage::all().iter().map(|s| s.name()).collect();
        assert_eq!(pipeline.stage_names(), expected);
    }

    #[tokio::test]
    async fn test_compose_overrides_method() {
        let composed = compose(echo_method(), &CompositionPolicy::default());

        let request: Request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/items/7")
            .header("x-http-method-override", "PATCH")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = composed.call(request).await;
        assert_eq!(body_text(response).await, "PATCH");
    }

    #[tokio::test]
    async fn test_compose_preflight_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let base: BoxHandler = Arc::new(move |_request: Request| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Response::text(StatusCode::OK, "handled") }
        });
        let composed = compose(base, &CompositionPolicy::default());

        let request: Request = HttpRequest::builder()
            .method(Method::OPTIONS)
            .uri("/items/7")
            .header(headers::ORIGIN, "https://client.example")
            .header(headers::REQUEST_METHOD, "DELETE")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = composed.call(request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compose_custom_cors() {
        let policy = CompositionPolicy::default().with_cors(
            CorsMiddleware::builder()
                .allow_origin("https://only.example")
                .build(),
        );
        let composed = compose(echo_method(), &policy);

        let request: Request = HttpRequest::builder()
            .uri("/")
            .header(headers::ORIGIN, "https://other.example")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = composed.call(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(headers::ALLOW_ORIGIN).is_none());
    }
}
