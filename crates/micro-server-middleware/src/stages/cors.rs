//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! Answers preflight requests without calling the wrapped handler and adds
//! the allow headers to every other cross-origin response.
//!
//! ## CORS Headers
//!
//! - `Access-Control-Allow-Origin`: Allowed origins
//! - `Access-Control-Allow-Methods`: Allowed HTTP methods
//! - `Access-Control-Allow-Headers`: Allowed request headers
//! - `Access-Control-Allow-Credentials`: Allow credentials
//! - `Access-Control-Max-Age`: Preflight cache duration
//! - `Access-Control-Expose-Headers`: Headers exposed to JavaScript
//!
//! ## Example
//!
//! ```
//! use micro_server_middleware::stages::CorsMiddleware;
//! use http::Method;
//! use std::time::Duration;
//!
//! let cors = CorsMiddleware::builder()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_headers(["Content-Type", "Authorization"])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(3600))
//!     .build();
//! assert!(cors.config().allows_credentials());
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::Full;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

/// Methods allowed by [`CorsMiddleware::default_policy`], in header order.
pub const DEFAULT_METHODS: [Method; 7] = [
    Method::GET,
    Method::PUT,
    Method::POST,
    Method::DELETE,
    Method::OPTIONS,
    Method::HEAD,
    Method::PATCH,
];

/// Request headers allowed by [`CorsMiddleware::default_policy`].
pub const DEFAULT_HEADERS: [&str; 8] = [
    "accept",
    "accept-language",
    "authorization",
    "content-language",
    "content-type",
    "origin",
    "x-http-method-override",
    "x-request-id",
];

/// CORS middleware that handles preflight requests and adds CORS headers.
///
/// # Preflight Handling
///
/// An `OPTIONS` request carrying `Origin` and `Access-Control-Request-Method`
/// is answered here with `204 No Content`, or `403 Forbidden` when the
/// origin, method or any requested header is not allowed.
///
/// # Regular Requests
///
/// The request continues down the chain. When its origin is allowed, the
/// response gets `Access-Control-Allow-Origin`, credentials and exposed
/// headers as configured. Requests without `Origin` are passed through
/// untouched.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

/// Configuration for CORS middleware.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    allowed_origins: AllowedOrigins,
    allowed_methods: Vec<Method>,
    allowed_headers: BTreeSet<String>,
    expose_headers: BTreeSet<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl CorsConfig {
    /// The allowed origins.
    pub fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed_origins
    }

    /// The allowed methods, in the order they are advertised.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed_methods
    }

    /// Whether credentials are allowed.
    pub fn allows_credentials(&self) -> bool {
        self.allow_credentials
    }

    fn allows_header(&self, header: &str) -> bool {
        self.allowed_headers.contains("*") || self.allowed_headers.contains(header)
    }
}

/// Represents the set of allowed origins.
#[derive(Debug, Clone)]
pub enum AllowedOrigins {
    /// Allow any origin.
    Any,
    /// Allow specific origins.
    List(HashSet<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }

    /// Returns the `Access-Control-Allow-Origin` value for a given origin.
    ///
    /// `Any` answers `*` unless credentials are allowed, in which case the
    /// request origin is mirrored since browsers reject `*` with credentials.
    pub fn header_value(&self, origin: &str, credentials: bool) -> Option<HeaderValue> {
        match self {
            Self::Any if !credentials => Some(HeaderValue::from_static("*")),
            Self::Any => HeaderValue::from_str(origin).ok(),
            Self::List(origins) if origins.contains(origin) => HeaderValue::from_str(origin).ok(),
            Self::List(_) => None,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::List(HashSet::new()),
            allowed_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ],
            allowed_headers: BTreeSet::from([
                "content-type".to_string(),
                "authorization".to_string(),
                "x-request-id".to_string(),
            ]),
            expose_headers: BTreeSet::new(),
            allow_credentials: false,
            max_age: Some(Duration::from_secs(86400)),
        }
    }
}

/// Builder for CORS configuration.
#[derive(Debug, Clone, Default)]
pub struct CorsBuilder {
    config: CorsConfig,
}

impl CorsBuilder {
    /// Creates a new CORS builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows any origin.
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.config.allowed_origins = AllowedOrigins::Any;
        self
    }

    /// Adds an allowed origin. Ignored once any origin is allowed.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        if let AllowedOrigins::List(origins) = &mut self.config.allowed_origins {
            origins.insert(origin.into());
        }
        self
    }

    /// Sets multiple allowed origins.
    #[must_use]
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_origins =
            AllowedOrigins::List(origins.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the allowed HTTP methods. Duplicates are dropped, order is kept.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        let mut allowed: Vec<Method> = Vec::new();
        for method in methods {
            if !allowed.contains(&method) {
                allowed.push(method);
            }
        }
        self.config.allowed_methods = allowed;
        self
    }

    /// Adds an allowed request header.
    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.config.allowed_headers.insert(header.into().to_lowercase());
        self
    }

    /// Sets the allowed request headers. `*` allows any header.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_headers = headers
            .into_iter()
            .map(|h| h.into().to_lowercase())
            .collect();
        self
    }

    /// Sets headers that should be exposed to JavaScript.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.expose_headers = headers
            .into_iter()
            .map(|h| h.into().to_lowercase())
            .collect();
        self
    }

    /// Sets whether to allow credentials (cookies, authorization headers).
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.config.allow_credentials = allow;
        self
    }

    /// Sets the max age for preflight cache.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.config.max_age = Some(duration);
        self
    }

    /// Disables preflight caching.
    #[must_use]
    pub fn no_max_age(mut self) -> Self {
        self.config.max_age = None;
        self
    }

    /// Builds the CORS middleware.
    #[must_use]
    pub fn build(self) -> CorsMiddleware {
        CorsMiddleware {
            config: self.config,
        }
    }
}

impl CorsMiddleware {
    /// Creates a new CORS builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// The policy applied by [`compose`](crate::compose) unless overridden.
    ///
    /// Any origin, credentials allowed, methods `GET PUT POST DELETE OPTIONS
    /// HEAD PATCH`, the common request headers plus the method override
    /// header, and no preflight caching.
    #[must_use]
    pub fn default_policy() -> Self {
        CorsBuilder::new()
            .allow_any_origin()
            .allow_credentials(true)
            .allow_methods(DEFAULT_METHODS)
            .allow_headers(DEFAULT_HEADERS)
            .no_max_age()
            .build()
    }

    /// The configuration in effect.
    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    /// Checks if a request is a CORS preflight request.
    fn is_preflight(request: &Request) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(headers::ORIGIN)
            && request.headers().contains_key(headers::REQUEST_METHOD)
    }

    fn origin(request: &Request) -> Option<&str> {
        request
            .headers()
            .get(headers::ORIGIN)
            .and_then(|v| v.to_str().ok())
    }

    /// Handles a preflight OPTIONS request.
    fn handle_preflight(&self, request: &Request) -> Response {
        let Some(origin) = Self::origin(request) else {
            return Response::error(StatusCode::FORBIDDEN, "Missing Origin header");
        };

        if !self.config.allowed_origins.is_allowed(origin) {
            return Response::error(StatusCode::FORBIDDEN, "Origin not allowed");
        }

        let requested_method = request
            .headers()
            .get(headers::REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .and_then(|m| m.parse::<Method>().ok());
        match requested_method {
            Some(method) if self.config.allowed_methods.contains(&method) => {}
            _ => return Response::error(StatusCode::FORBIDDEN, "Method not allowed"),
        }

        if let Some(requested) = request
            .headers()
            .get(headers::REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
        {
            let denied = requested
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .find(|h| !h.is_empty() && !self.config.allows_header(h));
            if let Some(header) = denied {
                return Response::error(
                    StatusCode::FORBIDDEN,
                    &format!("Header '{header}' not allowed"),
                );
            }
        }

        self.preflight_response(origin)
    }

    /// Creates a 204 No Content preflight response with CORS headers.
    fn preflight_response(&self, origin: &str) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();

        if let Some(value) = self
            .config
            .allowed_origins
            .header_value(origin, self.config.allow_credentials)
        {
            headers.insert(headers::ALLOW_ORIGIN, value);
        }

        let methods: Vec<_> = self.config.allowed_methods.iter().map(Method::as_str).collect();
        if let Ok(value) = HeaderValue::from_str(&methods.join(", ")) {
            headers.insert(headers::ALLOW_METHODS, value);
        }

        let allowed: Vec<_> = self.config.allowed_headers.iter().map(String::as_str).collect();
        if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
            headers.insert(headers::ALLOW_HEADERS, value);
        }

        if self.config.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }

        if let Some(max_age) = self.config.max_age {
            headers.insert(headers::MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }

        headers.insert(
            headers::VARY,
            HeaderValue::from_static(
                "Origin, Access-Control-Request-Method, Access-Control-Request-Headers",
            ),
        );

        response
    }

    /// Adds CORS headers to a response for non-preflight requests.
    fn add_cors_headers(&self, response: &mut Response, origin: &str) {
        let Some(value) = self
            .config
            .allowed_origins
            .header_value(origin, self.config.allow_credentials)
        else {
            return;
        };
        let mirrored = value != "*";

        let headers = response.headers_mut();
        headers.insert(headers::ALLOW_ORIGIN, value);

        if self.config.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }

        if !self.config.expose_headers.is_empty() {
            let exposed: Vec<_> = self.config.expose_headers.iter().map(String::as_str).collect();
            if let Ok(value) = HeaderValue::from_str(&exposed.join(", ")) {
                headers.insert(headers::EXPOSE_HEADERS, value);
            }
        }

        if mirrored {
            headers.append(headers::VARY, HeaderValue::from_static("Origin"));
        }
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if Self::is_preflight(&request) {
                let response = self.handle_preflight(&request);
                tracing::debug!(
                    status = response.status().as_u16(),
                    path = request.uri().path(),
                    "answered CORS preflight"
                );
                return response;
            }

            let origin = Self::origin(&request).map(String::from);
            let mut response = next.run(ctx, request).await;

            if let Some(origin) = origin.as_deref() {
                self.add_cors_headers(&mut response, origin);
            }

            response
        })
    }
}
