//! Server options.
//!
//! ```rust
//! use micro_server_http::ServerOptions;
//! use std::time::Duration;
//!
//! let options = ServerOptions::builder()
//!     .enable_profiling(true)
//!     .graceful_timeout(Duration::from_millis(250))
//!     .build();
//!
//! assert!(options.profiling_enabled());
//! assert_eq!(options.graceful_timeout(), Duration::from_millis(250));
//! ```

use std::time::Duration;

use micro_server_config::{ServerSettings, DEFAULT_GRACEFUL_TIMEOUT};

/// Time allowed for reading a request's headers.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the request body once the headers are in.
pub const BODY_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Options recognised by [`Server`](crate::Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    enable_profiling: bool,
    enable_tracing: bool,
    enable_replication: bool,
    graceful_timeout: Duration,
}

impl ServerOptions {
    /// Creates a new options builder.
    #[must_use]
    pub fn builder() -> ServerOptionsBuilder {
        ServerOptionsBuilder::default()
    }

    /// Whether the profiling surface was requested. Reserved.
    #[must_use]
    pub fn profiling_enabled(&self) -> bool {
        self.enable_profiling
    }

    /// Whether per-route request tracing was requested.
    #[must_use]
    pub fn tracing_enabled(&self) -> bool {
        self.enable_tracing
    }

    /// Whether request header replication was requested.
    #[must_use]
    pub fn replication_enabled(&self) -> bool {
        self.enable_replication
    }

    /// Upper bound on the shutdown drain.
    #[must_use]
    pub fn graceful_timeout(&self) -> Duration {
        self.graceful_timeout
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&ServerSettings> for ServerOptions {
    fn from(settings: &ServerSettings) -> Self {
        Self::builder()
            .enable_profiling(settings.enable_profiling)
            .enable_tracing(settings.enable_tracing)
            .enable_replication(settings.enable_replication)
            .graceful_timeout(settings.graceful_timeout())
            .build()
    }
}

/// Builder for [`ServerOptions`].
#[derive(Debug, Clone, Default)]
pub struct ServerOptionsBuilder {
    enable_profiling: bool,
    enable_tracing: bool,
    enable_replication: bool,
    graceful_timeout: Option<Duration>,
}

impl ServerOptionsBuilder {
    /// Reserves the profiling surface.
    #[must_use]
    pub fn enable_profiling(mut self, enabled: bool) -> Self {
        self.enable_profiling = enabled;
        self
    }

    /// Requests per-route tracing.
    #[must_use]
    pub fn enable_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Requests header replication.
    #[must_use]
    pub fn enable_replication(mut self, enabled: bool) -> Self {
        self.enable_replication = enabled;
        self
    }

    /// Sets the graceful timeout. A zero duration selects the default.
    #[must_use]
    pub fn graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = Some(timeout);
        self
    }

    /// Builds the options.
    #[must_use]
    pub fn build(self) -> ServerOptions {
        ServerOptions {
            enable_profiling: self.enable_profiling,
            enable_tracing: self.enable_tracing,
            enable_replication: self.enable_replication,
            graceful_timeout: self
                .graceful_timeout
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(DEFAULT_GRACEFUL_TIMEOUT),
        }
    }
}
