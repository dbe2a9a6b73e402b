//! Router facade.
//!
//! Routes are registered on a mutable [`Router`] and compiled into an
//! immutable [`RouteTable`] when the server starts. Registration after that
//! point has no effect on the running server.
//!
//! # Example
//!
//! ```rust
//! use http::Method;
//! use micro_server_http::Router;
//! use micro_server_middleware::StatusOk;
//!
//! let mut router = Router::new();
//! router
//!     .handle("/users/{id}", StatusOk::boxed())
//!     .methods([Method::GET, Method::DELETE]);
//!
//! let mut api = router.scope("/api/v1");
//! api.handle("/ping", StatusOk::boxed()).methods([Method::GET]);
//!
//! let mut templates = Vec::new();
//! router
//!     .walk(|_, route| {
//!         templates.push(route.path_template().map(str::to_string));
//!         Ok::<_, ()>(())
//!     })
//!     .unwrap();
//! assert_eq!(
//!     templates,
//!     [Some("/users/{id}".to_string()), Some("/api/v1/ping".to_string())]
//! );
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode};
use micro_server_middleware::{BoxFuture, BoxHandler, Handler, Request, Response, ResponseExt};

/// Parameters captured from `{name}` template segments.
///
/// Inserted into the request extensions before the route handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    /// Returns a captured parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of captured parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn parse_segments(template: &str) -> Vec<Segment> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(s.to_string()),
        })
        .collect()
}

fn match_segments(segments: &[Segment], path: &str) -> Option<PathParams> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.len() != segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (segment, actual) in segments.iter().zip(parts) {
        match segment {
            Segment::Literal(expected) if expected != actual => return None,
            Segment::Literal(_) => {}
            Segment::Param(name) => {
                params.insert(name.clone(), actual.to_string());
            }
        }
    }
    Some(PathParams(params))
}

fn allows(methods: &[Method], method: &Method) -> bool {
    methods.is_empty() || methods.contains(method)
}

fn join(prefix: &str, path: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// A registered route.
///
/// A route without methods accepts every method.
#[derive(Default)]
pub struct Route {
    template: Option<String>,
    segments: Vec<Segment>,
    methods: Vec<Method>,
    handler: Option<BoxHandler>,
}

impl Route {
    /// Sets the path template.
    pub fn path(&mut self, template: impl Into<String>) -> &mut Self {
        let template = template.into();
        self.segments = parse_segments(&template);
        self.template = Some(template);
        self
    }

    /// Restricts the route to `methods`.
    pub fn methods<I>(&mut self, methods: I) -> &mut Self
    where
        I: IntoIterator<Item = Method>,
    {
        for method in methods {
            if !self.methods.contains(&method) {
                self.methods.push(method);
            }
        }
        self
    }

    /// Sets the handler.
    pub fn handler(&mut self, handler: BoxHandler) -> &mut Self {
        self.handler = Some(handler);
        self
    }

    /// The path template, if one was set.
    #[must_use]
    pub fn path_template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Methods the route is restricted to. Empty means any.
    #[must_use]
    pub fn allowed_methods(&self) -> &[Method] {
        &self.methods
    }

    /// Whether a handler is attached.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("template", &self.template)
            .field("methods", &self.methods)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Mutable registry of path to handler bindings.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` at `template`.
    pub fn handle(&mut self, template: &str, handler: BoxHandler) -> &mut Route {
        let route = self.route();
        route.path(template).handler(handler);
        route
    }

    /// Registers an empty route to be configured by the caller.
    pub fn route(&mut self) -> &mut Route {
        let index = self.routes.len();
        self.routes.push(Route::default());
        &mut self.routes[index]
    }

    /// Registers routes below `prefix`.
    pub fn scope(&mut self, prefix: &str) -> Scope<'_> {
        Scope {
            router: self,
            prefix: prefix.to_string(),
        }
    }

    /// Visits every route in registration order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns whatever `visit` returns.
    pub fn walk<F, E>(&self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(usize, &Route) -> Result<(), E>,
    {
        self.routes
            .iter()
            .enumerate()
            .try_for_each(|(index, route)| visit(index, route))
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Builds the dispatch table, passing each handler through `decorate`.
    ///
    /// Routes without a template or handler are left out.
    pub fn compile<F>(&self, mut decorate: F) -> RouteTable
    where
        F: FnMut(&str, BoxHandler) -> BoxHandler,
    {
        let routes: Vec<CompiledRoute> = self
            .routes
            .iter()
            .filter_map(|route| {
                let template = route.template.as_deref()?;
                let handler = route.handler.clone()?;
                Some(CompiledRoute {
                    segments: route.segments.clone(),
                    methods: route.methods.clone(),
                    handler: decorate(template, handler),
                })
            })
            .collect();

        RouteTable {
            routes: routes.into(),
        }
    }
}

/// Registers routes below a path prefix.
#[derive(Debug)]
pub struct Scope<'a> {
    router: &'a mut Router,
    prefix: String,
}

impl Scope<'_> {
    /// Registers `handler` at `prefix + template`.
    pub fn handle(&mut self, template: &str, handler: BoxHandler) -> &mut Route {
        let full = join(&self.prefix, template);
        self.router.handle(&full, handler)
    }

    /// Nests a further prefix.
    pub fn scope(&mut self, prefix: &str) -> Scope<'_> {
        let prefix = join(&self.prefix, prefix);
        Scope {
            router: &mut *self.router,
            prefix,
        }
    }
}

struct CompiledRoute {
    segments: Vec<Segment>,
    methods: Vec<Method>,
    handler: BoxHandler,
}

/// Immutable dispatch table compiled from a [`Router`].
#[derive(Clone)]
pub struct RouteTable {
    routes: Arc<[CompiledRoute]>,
}

impl RouteTable {
    /// Number of dispatchable routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn dispatch(&self, mut request: Request) -> BoxFuture<'static, Response> {
        let path = request.uri().path().to_string();
        let mut path_matched = false;

        for route in self.routes.iter() {
            let Some(params) = match_segments(&route.segments, &path) else {
                continue;
            };
            if !allows(&route.methods, request.method()) {
                path_matched = true;
                continue;
            }
            request.extensions_mut().insert(params);
            return route.handler.call(request);
        }

        let status = if path_matched {
            StatusCode::METHOD_NOT_ALLOWED
        } else {
            StatusCode::NOT_FOUND
        };
        Box::pin(async move {
            Response::text(
                status,
                format!(
                    "{} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default().to_lowercase()
                ),
            )
        })
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Handler for RouteTable {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        self.dispatch(request)
    }
}
