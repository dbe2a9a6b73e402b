//! Listener factory.
//!
//! [`resolve`] turns an endpoint string into a bound, listening socket:
//!
//! - `\\<path>` opens a local channel. On Unix this is a domain socket bound
//!   at `<path>`; on Windows the whole endpoint is used as a named pipe name
//!   (for example `\\.\pipe\sample`).
//! - Anything else is a `host:port` TCP address. An empty host (`:8080`)
//!   listens on every interface.
//!
//! Binding is a single synchronous attempt. Connections are only accepted
//! once the listener is handed to a running server.

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

use crate::error::ListenerError;

/// Endpoint prefix selecting a local channel instead of TCP.
pub const PIPE_PREFIX: &str = r"\\";

const ANY_INTERFACE: &str = "0.0.0.0";

/// Opens a listener for `endpoint`.
///
/// # Errors
///
/// Returns [`ListenerError::Pipe`] or [`ListenerError::Tcp`] with the
/// underlying cause when the socket cannot be bound.
///
/// # Example
///
/// ```
/// use micro_server_http::listener::{resolve, ListenAddr};
///
/// let listener = resolve("127.0.0.1:0").unwrap();
/// match listener.local_addr().unwrap() {
///     ListenAddr::Tcp(addr) => assert_ne!(addr.port(), 0),
///     ListenAddr::Pipe(_) => unreachable!(),
/// }
/// ```
pub fn resolve(endpoint: &str) -> Result<Listener, ListenerError> {
    Listener::resolve(endpoint)
}

/// Address a listener is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// A TCP socket address.
    Tcp(SocketAddr),
    /// A local channel path.
    Pipe(String),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Pipe(path) => f.write_str(path),
        }
    }
}

/// A bound, listening socket.
///
/// Dropping the listener closes it; a Unix socket file is removed at the
/// same time.
#[derive(Debug)]
pub struct Listener {
    endpoint: String,
    socket: Socket,
}

#[derive(Debug)]
enum Socket {
    Tcp(StdTcpListener),
    #[cfg(unix)]
    Unix {
        listener: std::os::unix::net::UnixListener,
        file: SocketFile,
    },
    #[cfg(windows)]
    Pipe {
        name: String,
        first: NamedPipeServer,
    },
}

impl Listener {
    /// See [`resolve`].
    ///
    /// # Errors
    ///
    /// Returns a [`ListenerError`] when the socket cannot be bound.
    pub fn resolve(endpoint: &str) -> Result<Self, ListenerError> {
        let socket = match endpoint.strip_prefix(PIPE_PREFIX) {
            Some(path) => open_pipe(endpoint, path)?,
            None => Socket::Tcp(bind_tcp(endpoint)?),
        };

        Ok(Self {
            endpoint: endpoint.to_string(),
            socket,
        })
    }

    /// The endpoint this listener was resolved from.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether this is a local channel rather than a TCP socket.
    pub fn is_pipe(&self) -> bool {
        !matches!(self.socket, Socket::Tcp(_))
    }

    /// The bound address. A TCP endpoint with port `0` reports the port the
    /// system picked.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Socket`] if the socket cannot be queried.
    pub fn local_addr(&self) -> Result<ListenAddr, ListenerError> {
        match &self.socket {
            Socket::Tcp(listener) => listener
                .local_addr()
                .map(ListenAddr::Tcp)
                .map_err(ListenerError::Socket),
            #[cfg(unix)]
            Socket::Unix { file, .. } => Ok(ListenAddr::Pipe(file.0.display().to_string())),
            #[cfg(windows)]
            Socket::Pipe { name, .. } => Ok(ListenAddr::Pipe(name.clone())),
        }
    }

    /// Closes the listener.
    pub fn close(self) {
        tracing::debug!(endpoint = %self.endpoint, "closing listener");
    }

    /// Registers the socket with the Tokio reactor.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn into_acceptor(self) -> Result<Acceptor, ListenerError> {
        match self.socket {
            Socket::Tcp(listener) => TcpListener::from_std(listener)
                .map(Acceptor::Tcp)
                .map_err(ListenerError::Socket),
            #[cfg(unix)]
            Socket::Unix { listener, file } => UnixListener::from_std(listener)
                .map(|listener| Acceptor::Unix {
                    listener,
                    _file: file,
                })
                .map_err(ListenerError::Socket),
            #[cfg(windows)]
            Socket::Pipe { name, first } => Ok(Acceptor::Pipe { name, next: first }),
        }
    }
}

fn bind_tcp(endpoint: &str) -> Result<StdTcpListener, ListenerError> {
    let address = if endpoint.starts_with(':') {
        format!("{ANY_INTERFACE}{endpoint}")
    } else {
        endpoint.to_string()
    };

    let to_error = |source| ListenerError::Tcp {
        endpoint: endpoint.to_string(),
        source,
    };
    let listener = StdTcpListener::bind(address.as_str()).map_err(to_error)?;
    listener.set_nonblocking(true).map_err(to_error)?;
    Ok(listener)
}

#[cfg(unix)]
fn open_pipe(_endpoint: &str, path: &str) -> Result<Socket, ListenerError> {
    let to_error = |source| ListenerError::Pipe {
        path: path.to_string(),
        source,
    };
    let listener = std::os::unix::net::UnixListener::bind(path).map_err(to_error)?;
    listener.set_nonblocking(true).map_err(to_error)?;
    Ok(Socket::Unix {
        listener,
        file: SocketFile(PathBuf::from(path)),
    })
}

#[cfg(windows)]
fn open_pipe(endpoint: &str, _path: &str) -> Result<Socket, ListenerError> {
    let to_error = |source| ListenerError::Pipe {
        path: endpoint.to_string(),
        source,
    };
    // Pipe instances are registered with the reactor as soon as they exist.
    tokio::runtime::Handle::try_current().map_err(|e| to_error(io::Error::other(e)))?;
    let first = ServerOptions::new()
        .first_pipe_instance(true)
        .create(endpoint)
        .map_err(to_error)?;
    Ok(Socket::Pipe {
        name: endpoint.to_string(),
        first,
    })
}

/// Removes the socket file when the listener goes away.
#[cfg(unix)]
#[derive(Debug)]
pub(crate) struct SocketFile(PathBuf);

#[cfg(unix)]
impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}

/// The accepting half of a listener, owned by a running server.
pub(crate) enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        _file: SocketFile,
    },
    #[cfg(windows)]
    Pipe {
        name: String,
        next: NamedPipeServer,
    },
}

impl Acceptor {
    /// Waits for the next connection. Cancel safe.
    pub(crate) async fn accept(&mut self) -> io::Result<Connection> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                }
                Ok(Connection::Tcp(stream))
            }
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Connection::Unix(stream))
            }
            #[cfg(windows)]
            Self::Pipe { name, next } => {
                next.connect().await?;
                let fresh = ServerOptions::new().create(name.as_str())?;
                Ok(Connection::Pipe(std::mem::replace(next, fresh)))
            }
        }
    }
}

/// An accepted connection of any listener kind.
pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(windows)]
    Pipe(NamedPipeServer),
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(windows)]
            Self::Pipe(pipe) => Pin::new(pipe).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(windows)]
            Self::Pipe(pipe) => Pin::new(pipe).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(windows)]
            Self::Pipe(pipe) => Pin::new(pipe).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(windows)]
            Self::Pipe(pipe) => Pin::new(pipe).poll_shutdown(cx),
        }
    }
}
