//! Server lifecycle controller.
//!
//! A [`Controller`] owns one listener and moves through
//! `Idle → Running → ShuttingDown → Stopped`:
//!
//! - **Running**: connections are accepted and served.
//! - **ShuttingDown**: entered once, when the cancellation token fires or
//!   [`Controller::shutdown`] is called. The listener is closed and open
//!   connections finish their in-flight request.
//! - **Stopped**: every connection is closed. Connections still busy when the
//!   graceful timeout elapses are aborted.
//!
//! A controller runs at most once. The listener is released when it stops.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use micro_server_middleware::{BoxHandler, Request, Response, ResponseExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, ServerResult};
use crate::listener::{Acceptor, Connection, Listener};
use crate::options::{BODY_READ_TIMEOUT, HEADER_READ_TIMEOUT};

/// Pause before accepting again after the process ran out of descriptors or
/// buffer space.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Lifecycle state of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, not serving yet.
    Idle,
    /// Accepting and serving connections.
    Running,
    /// No longer accepting; draining in-flight requests.
    ShuttingDown,
    /// All resources released.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug)]
struct Inner {
    listener: Option<Listener>,
    stop: Option<CancellationToken>,
}

/// Runs the accept loop for one listener and coordinates its shutdown.
#[derive(Debug)]
pub struct Controller {
    inner: Mutex<Inner>,
    state: watch::Sender<LifecycleState>,
    graceful_timeout: Duration,
}

impl Controller {
    /// Takes ownership of `listener`.
    #[must_use]
    pub fn new(listener: Listener, graceful_timeout: Duration) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            inner: Mutex::new(Inner {
                listener: Some(listener),
                stop: None,
            }),
            state,
            graceful_timeout,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Upper bound on the drain after shutdown starts.
    #[must_use]
    pub fn graceful_timeout(&self) -> Duration {
        self.graceful_timeout
    }

    /// Serves `handler` until `cancel` fires, [`shutdown`](Self::shutdown) is
    /// called, or the listener fails.
    ///
    /// Requested shutdown returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] while a previous run is active. The
    ///   active run is not affected.
    /// - [`ServerError::ListenerNotInitialized`] once the listener was
    ///   released.
    /// - [`ServerError::Listener`] if the socket cannot join the runtime.
    /// - [`ServerError::Accept`] if accepting fails persistently.
    pub async fn run(&self, cancel: &CancellationToken, handler: BoxHandler) -> ServerResult<()> {
        let (acceptor, stop) = {
            let mut inner = self.inner.lock();
            if inner.stop.is_some() {
                return Err(ServerError::AlreadyRunning);
            }
            let listener = inner
                .listener
                .take()
                .ok_or(ServerError::ListenerNotInitialized)?;
            let acceptor = match listener.into_acceptor() {
                Ok(acceptor) => acceptor,
                Err(e) => {
                    self.state.send_replace(LifecycleState::Stopped);
                    return Err(e.into());
                }
            };

            let stop = CancellationToken::new();
            inner.stop = Some(stop.clone());
            self.state.send_replace(LifecycleState::Running);
            (acceptor, stop)
        };

        let result = self.serve(acceptor, cancel, &stop, handler).await;

        self.inner.lock().stop = None;
        self.state.send_replace(LifecycleState::Stopped);
        result
    }

    async fn serve(
        &self,
        mut acceptor: Acceptor,
        cancel: &CancellationToken,
        stop: &CancellationToken,
        handler: BoxHandler,
    ) -> ServerResult<()> {
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                () = stop.cancelled() => break Ok(()),
                accepted = acceptor.accept() => match accepted {
                    Ok(connection) => {
                        connections.spawn(serve_connection(
                            connection,
                            Arc::clone(&handler),
                            stop.clone(),
                        ));
                    }
                    Err(e) if is_resource_exhausted(&e) => {
                        tracing::error!(
                            error = %e,
                            backoff_ms = u64::try_from(ACCEPT_BACKOFF.as_millis()).unwrap_or(u64::MAX),
                            "accept failed, backing off"
                        );
                        tokio::select! {
                            () = cancel.cancelled() => break Ok(()),
                            () = stop.cancelled() => break Ok(()),
                            () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::warn!(error = %e, "transient accept error");
                    }
                    Err(e) => break Err(ServerError::Accept(e)),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "connection task panicked");
                        }
                    }
                }
            }
        };

        drop(acceptor);
        self.state.send_replace(LifecycleState::ShuttingDown);
        stop.cancel();
        tracing::debug!(
            connections = connections.len(),
            timeout_ms = u64::try_from(self.graceful_timeout.as_millis()).unwrap_or(u64::MAX),
            "draining connections"
        );

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.graceful_timeout, drain).await.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "graceful timeout elapsed, closing remaining connections"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        result
    }

    /// Stops the controller.
    ///
    /// A running controller drains as if cancelled, and this waits until it
    /// is stopped. An idle controller releases its listener. A stopped one is
    /// left alone. Always succeeds.
    ///
    /// # Errors
    ///
    /// Reserved for close failures; none are currently reported.
    pub async fn shutdown(&self) -> ServerResult<()> {
        let mut states = self.state.subscribe();

        let running = {
            let mut inner = self.inner.lock();
            if let Some(stop) = inner.stop.as_ref() {
                stop.cancel();
                true
            } else {
                if let Some(listener) = inner.listener.take() {
                    listener.close();
                    self.state.send_replace(LifecycleState::Stopped);
                }
                false
            }
        };

        if running
            && states
                .wait_for(|state| *state == LifecycleState::Stopped)
                .await
                .is_err()
        {
            tracing::debug!("lifecycle state channel closed");
        }
        Ok(())
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || is_resource_exhausted(e)
}

/// Out of file descriptors, socket buffers or memory. Accepting again
/// right away would spin.
fn is_resource_exhausted(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::OutOfMemory || e.raw_os_error().is_some_and(is_exhaustion_code)
}

#[cfg(unix)]
fn is_exhaustion_code(code: i32) -> bool {
    matches!(
        code,
        libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM
    )
}

// WSAEMFILE and WSAENOBUFS.
#[cfg(windows)]
fn is_exhaustion_code(code: i32) -> bool {
    matches!(code, 10024 | 10055)
}

async fn serve_connection(connection: Connection, handler: BoxHandler, stop: CancellationToken) {
    let service = service_fn(move |request: http::Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(dispatch(handler, request).await) }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT)
        .keep_alive(true);

    let conn = builder.serve_connection(TokioIo::new(connection), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "connection closed with error");
            }
            return;
        }
        () = stop.cancelled() => {}
    }

    conn.as_mut().graceful_shutdown();
    if let Err(e) = conn.await {
        tracing::debug!(error = %e, "connection closed with error during shutdown");
    }
}

async fn dispatch(handler: BoxHandler, request: http::Request<Incoming>) -> Response {
    let (parts, body) = request.into_parts();
    match read_body(body, BODY_READ_TIMEOUT).await {
        Ok(bytes) => {
            let request: Request = http::Request::from_parts(parts, Full::new(bytes));
            handler.call(request).await
        }
        Err(response) => response,
    }
}

async fn read_body<B>(body: B, limit: Duration) -> Result<Bytes, Response>
where
    B: hyper::body::Body,
    B::Error: fmt::Display,
{
    match tokio::time::timeout(limit, body.collect()).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "failed to read request body");
            Err(Response::error(StatusCode::BAD_REQUEST, "failed to read request body"))
        }
        Err(_) => {
            tracing::debug!("request body not received in time");
            Err(Response::error(StatusCode::REQUEST_TIMEOUT, "request body not received in time"))
        }
    }
}
