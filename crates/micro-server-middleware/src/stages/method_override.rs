//! HTTP method override middleware.
//!
//! Lets clients that can only send `POST` express `PUT`, `PATCH` or
//! `DELETE`. The override is read from the `_method` form field of a
//! `application/x-www-form-urlencoded` body, then from `_method` in the query
//! string, then from the `X-HTTP-Method-Override` header. A non-empty form
//! value wins even when it names a verb that cannot be overridden.
//!
//! The replaced method is kept as [`OriginalMethod`] in both the request
//! extensions and the middleware context.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use bytes::Bytes;
use http::request::Parts;
use http::{header, Method};
use http_body_util::{BodyExt, Full};
use std::borrow::Cow;

/// Header carrying the override.
pub const OVERRIDE_HEADER: &str = "x-http-method-override";

/// Form and query field carrying the override.
pub const OVERRIDE_FIELD: &str = "_method";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// The method a request arrived with before it was overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalMethod(pub Method);

/// Rewrites `POST` requests to the verb they ask for.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodOverrideMiddleware;

impl MethodOverrideMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Verbs a `POST` may be turned into.
    pub fn is_overridable(method: &Method) -> bool {
        *method == Method::PUT || *method == Method::PATCH || *method == Method::DELETE
    }

    async fn rewrite(ctx: &mut MiddlewareContext, request: Request) -> Request {
        let (parts, body) = request.into_parts();

        if !is_form(&parts) {
            return Self::apply(ctx, parts, body, None);
        }

        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        let form = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|encoded| form_value(encoded, OVERRIDE_FIELD));
        Self::apply(ctx, parts, Full::new(bytes), form)
    }

    fn apply(
        ctx: &mut MiddlewareContext,
        mut parts: Parts,
        body: Full<Bytes>,
        form: Option<String>,
    ) -> Request {
        let requested = form
            .filter(|v| !v.is_empty())
            .or_else(|| {
                parts
                    .uri
                    .query()
                    .and_then(|query| form_value(query, OVERRIDE_FIELD))
                    .filter(|v| !v.is_empty())
            })
            .or_else(|| {
                parts
                    .headers
                    .get(OVERRIDE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });

        if let Some(method) = requested
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .filter(Self::is_overridable)
        {
            tracing::debug!(
                from = %parts.method,
                to = %method,
                path = parts.uri.path(),
                "overriding request method"
            );
            let original = OriginalMethod(std::mem::replace(&mut parts.method, method));
            parts.extensions.insert(original.clone());
            ctx.set_extension(original);
        }

        Request::from_parts(parts, body)
    }
}

impl Middleware for MethodOverrideMiddleware {
    fn name(&self) -> &'static str {
        "method_override"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request = if request.method() == Method::POST {
                Self::rewrite(ctx, request).await
            } else {
                request
            };
            next.run(ctx, request).await
        })
    }
}

fn is_form(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}

/// First value of `key` in an urlencoded string.
fn form_value(encoded: &str, key: &str) -> Option<String> {
    encoded
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if decode(k)? == key {
                decode(v)
            } else {
                None
            }
        })
}

fn decode(component: &str) -> Option<String> {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Request as HttpRequest, StatusCode};

    fn echo_handler(
    ) -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> {
        |_ctx, req| {
            Box::pin(async move {
                let method = req.method().to_string();
                let original = req
                    .extensions()
                    .get::<OriginalMethod>()
                    .map(|m| m.0.to_string())
                    .unwrap_or_default();
                let body = req.into_body().collect().await.unwrap().to_bytes();
                http::Response::builder()
                    .status(StatusCode::OK)
                    .header("x-method", method)
                    .header("x-original-method", original)
                    .body(Full::new(body))
                    .unwrap()
            })
        }
    }

    async fn run(request: Request) -> (MiddlewareContext, Response) {
        let mut ctx = MiddlewareContext::new();
        let response = MethodOverrideMiddleware::new()
            .process(&mut ctx, request, Next::handler(echo_handler()))
            .await;
        (ctx, response)
    }

    fn post(uri: &str) -> http::request::Builder {
        HttpRequest::builder().method(Method::POST).uri(uri)
    }

    #[test]
    fn test_form_value() {
        assert_eq!(form_value("a=1&_method=PUT", "_method").as_deref(), Some("PUT"));
        assert_eq!(form_value("_method=PATCH&_method=PUT", "_method").as_deref(), Some("PATCH"));
        assert_eq!(form_value("name=a+b%21", "name").as_deref(), Some("a b!"));
        assert_eq!(form_value("flag&x=1", "flag").as_deref(), Some(""));
        assert_eq!(form_value("", "_method"), None);
    }

    #[test]
    fn test_is_overridable() {
        assert!(MethodOverrideMiddleware::is_overridable(&Method::PUT));
        assert!(MethodOverrideMiddleware::is_overridable(&Method::PATCH));
        assert!(MethodOverrideMiddleware::is_overridable(&Method::DELETE));
        assert!(!MethodOverrideMiddleware::is_overridable(&Method::GET));
        assert!(!MethodOverrideMiddleware::is_overridable(&Method::POST));
    }

    #[tokio::test]
    async fn test_header_override() {
        let request = post("/items/1")
            .header(OVERRIDE_HEADER, "DELETE")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (ctx, response) = run(request).await;

        assert_eq!(response.headers().get("x-method").unwrap(), "DELETE");
        assert_eq!(response.headers().get("x-original-method").unwrap(), "POST");
        assert_eq!(
            ctx.get_extension::<OriginalMethod>(),
            Some(&OriginalMethod(Method::POST))
        );
    }

    #[tokio::test]
    async fn test_form_override_keeps_body() {
        let request = post("/items/1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
            .body(Full::new(Bytes::from("_method=PUT&name=widget")))
            .unwrap();

        let (ctx, response) = run(request).await;

        assert!(ctx.has_extension::<OriginalMethod>());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "_method=PUT&name=widget");
    }

    #[tokio::test]
    async fn test_form_wins_over_header() {
        let request = post("/items/1")
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(OVERRIDE_HEADER, "DELETE")
            .body(Full::new(Bytes::from("_method=GET")))
            .unwrap();

        let (ctx, _) = run(request).await;

        assert!(!ctx.has_extension::<OriginalMethod>());
    }

    #[tokio::test]
    async fn test_query_override() {
        let request = post("/items/1?_method=PATCH")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (ctx, response) = run(request).await;

        assert!(ctx.has_extension::<OriginalMethod>());
        assert_eq!(response.headers().get("x-method").unwrap(), "PATCH");
    }

    #[tokio::test]
    async fn test_lowercase_is_ignored() {
        let request = post("/items/1")
            .header(OVERRIDE_HEADER, "delete")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (ctx, _) = run(request).await;

        assert!(!ctx.has_extension::<OriginalMethod>());
    }

    #[tokio::test]
    async fn test_non_post_untouched() {
        let request = HttpRequest::builder()
            .method(Method::GET)
            .uri("/items/1")
            .header(OVERRIDE_HEADER, "DELETE")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (ctx, response) = run(request).await;

        assert!(!ctx.has_extension::<OriginalMethod>());
        assert_eq!(response.headers().get("x-original-method").unwrap(), "");
    }
}
