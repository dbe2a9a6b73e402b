//! Readiness probe handler.
//!
//! [`ReadinessCheck`] aggregates named checks and a shutdown override into a
//! handler suitable for `GET /healthz/readiness`.
//!
//! ```rust
//! use micro_server_http::ReadinessCheck;
//!
//! let readiness = ReadinessCheck::new()
//!     .add_check("database", || true)
//!     .add_check("cache", || true);
//! assert!(readiness.is_ready());
//!
//! readiness.set_ready(false);
//! assert!(!readiness.is_ready());
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::StatusCode;
use micro_server_middleware::{BoxFuture, BoxHandler, Handler, Request, Response, ResponseExt};
use serde::{Deserialize, Serialize};

/// Body of a readiness response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessStatus {
    ready: bool,
    checks: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    failing: Vec<String>,
}

impl ReadinessStatus {
    /// Whether the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Result of a named check.
    #[must_use]
    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.get(name).copied()
    }

    /// Names of the checks that failed.
    #[must_use]
    pub fn failing(&self) -> &[String] {
        &self.failing
    }
}

type CheckFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Readiness handler built from named checks.
///
/// Clones share the override flag, so a clone handed to the server can be
/// flipped to not-ready from elsewhere when shutdown begins.
#[derive(Clone)]
pub struct ReadinessCheck {
    checks: Vec<(String, CheckFn)>,
    ready_override: Arc<AtomicBool>,
}

impl std::fmt::Debug for ReadinessCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessCheck")
            .field("checks", &self.checks.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("ready_override", &self.ready_override)
            .finish()
    }
}

impl ReadinessCheck {
    /// A check with no registered checks, ready by default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            ready_override: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Registers a named check.
    #[must_use]
    pub fn add_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.checks.push((name.into(), Arc::new(check)));
        self
    }

    /// Whether the override is set and every check passes.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_override.load(Ordering::SeqCst) && self.checks.iter().all(|(_, check)| check())
    }

    /// Evaluates every check.
    #[must_use]
    pub fn status(&self) -> ReadinessStatus {
        let checks: BTreeMap<String, bool> = self
            .checks
            .iter()
            .map(|(name, check)| (name.clone(), check()))
            .collect();
        let failing: Vec<String> = checks
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(name, _)| name.clone())
            .collect();
        let ready = self.ready_override.load(Ordering::SeqCst) && failing.is_empty();

        ReadinessStatus {
            ready,
            checks,
            failing,
        }
    }

    /// Sets the override. `false` reports not-ready regardless of checks.
    pub fn set_ready(&self, ready: bool) {
        self.ready_override.store(ready, Ordering::SeqCst);
    }

    /// Number of registered checks.
    #[must_use]
    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// The check as a [`BoxHandler`] sharing this instance's override.
    #[must_use]
    pub fn boxed(&self) -> BoxHandler {
        Arc::new(self.clone())
    }

    fn respond(&self) -> Response {
        let status = self.status();
        let code = if status.is_ready() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        match serde_json::to_value(&status) {
            Ok(body) => Response::json(code, &body),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode readiness status");
                Response::error(StatusCode::INTERNAL_SERVER_ERROR, "readiness encoding failed")
            }
        }
    }
}

impl Default for ReadinessCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for ReadinessCheck {
    fn call(&self, _request: Request) -> BoxFuture<'static, Response> {
        let response = self.respond();
        Box::pin(async move { response })
    }
}
