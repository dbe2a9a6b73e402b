//! Error types for listeners and the server lifecycle.

use std::io;

use thiserror::Error;

/// Failure to open a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The local channel could not be opened.
    #[error("failed to listen on local channel `{path}`: {source}")]
    Pipe {
        /// Channel path.
        path: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// The TCP address could not be bound.
    #[error("failed to listen on `{endpoint}`: {source}")]
    Tcp {
        /// Requested endpoint.
        endpoint: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// The bound socket could not be handed to the runtime or queried.
    #[error("listener socket error: {0}")]
    Socket(#[source] io::Error),
}

/// Errors reported by the server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `run` was called without a listener, or after the listener was released.
    #[error("listener not initialized")]
    ListenerNotInitialized,

    /// `run` was called while a previous run is still active.
    #[error("server already running")]
    AlreadyRunning,

    /// A registered route has no path template.
    #[error("route #{index} has no path template")]
    MissingPathTemplate {
        /// Registration index of the route.
        index: usize,
    },

    /// The listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// The accept loop hit a non-transient error.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// An OS signal handler could not be installed.
    #[error("failed to register signal handler: {0}")]
    Signal(#[source] io::Error),
}

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
