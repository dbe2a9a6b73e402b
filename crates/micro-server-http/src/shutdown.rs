//! Signal-driven cancellation.
//!
//! [`link_to_signals`] derives a child token from a parent and cancels it on
//! the first delivery of any of the requested signals. Releasing the link
//! puts the default action back, so a later Ctrl+C terminates the process
//! again.
//!
//! # Example
//!
//! ```rust,no_run
//! use micro_server_http::shutdown::cancel_on_termination;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), micro_server_http::ServerError> {
//! let root = CancellationToken::new();
//! let (cancel, release) = cancel_on_termination(&root)?;
//!
//! // Ctrl+C or SIGTERM cancels `cancel`.
//! cancel.cancelled().await;
//!
//! release.release().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, ServerResult};

/// Process signals that can drive cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Interrupt (`SIGINT`, Ctrl+C).
    Interrupt,
    /// Termination request (`SIGTERM`; console close on Windows).
    Terminate,
    /// Hang-up (`SIGHUP`). Unix only.
    Hangup,
    /// Quit (`SIGQUIT`). Unix only.
    Quit,
}

/// Signals used by [`cancel_on_termination`].
pub const TERMINATION_SIGNALS: [Signal; 2] = [Signal::Interrupt, Signal::Terminate];

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
        })
    }
}

enum SignalStream {
    #[cfg(unix)]
    Unix(tokio::signal::unix::Signal),
    #[cfg(windows)]
    CtrlC(tokio::signal::windows::CtrlC),
    #[cfg(windows)]
    CtrlClose(tokio::signal::windows::CtrlClose),
}

#[cfg(unix)]
impl Signal {
    const fn raw(self) -> std::ffi::c_int {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};

        match self {
            Self::Interrupt => SIGINT,
            Self::Terminate => SIGTERM,
            Self::Hangup => SIGHUP,
            Self::Quit => SIGQUIT,
        }
    }
}

/// Default signal actions reinstated by released links.
///
/// The runtime keeps its own handler installed for the life of the process,
/// so the default action is emulated from a second handler. A new link on the
/// same signal removes it again.
#[cfg(unix)]
mod disposition {
    use std::io;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use signal_hook::SigId;

    use super::Signal;

    static RESTORED: Mutex<Vec<(Signal, SigId)>> = parking_lot::const_mutex(Vec::new());

    pub(super) fn restore_default(signal: Signal) -> io::Result<()> {
        let mut restored = RESTORED.lock();
        if restored.iter().any(|(s, _)| *s == signal) {
            return Ok(());
        }
        let id = signal_hook::flag::register_conditional_default(
            signal.raw(),
            Arc::new(AtomicBool::new(true)),
        )?;
        restored.push((signal, id));
        Ok(())
    }

    pub(super) fn take_over(signal: Signal) {
        let mut restored = RESTORED.lock();
        let (removed, kept): (Vec<_>, Vec<_>) =
            restored.drain(..).partition(|(s, _)| *s == signal);
        *restored = kept;
        for (_, id) in removed {
            if !signal_hook::low_level::unregister(id) {
                tracing::debug!(%signal, "default action was already removed");
            }
        }
    }
}

impl SignalStream {
    #[cfg(unix)]
    fn register(signal: Signal) -> io::Result<Self> {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        let kind = match signal {
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Terminate => SignalKind::terminate(),
            Signal::Hangup => SignalKind::hangup(),
            Signal::Quit => SignalKind::quit(),
        };
        unix_signal(kind).map(Self::Unix)
    }

    #[cfg(windows)]
    fn register(signal: Signal) -> io::Result<Self> {
        use tokio::signal::windows;

        match signal {
            Signal::Interrupt => windows::ctrl_c().map(Self::CtrlC),
            Signal::Terminate => windows::ctrl_close().map(Self::CtrlClose),
            Signal::Hangup | Signal::Quit => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{signal} is not available on this platform"),
            )),
        }
    }

    async fn recv(&mut self) -> Option<()> {
        match self {
            #[cfg(unix)]
            Self::Unix(stream) => stream.recv().await,
            #[cfg(windows)]
            Self::CtrlC(stream) => stream.recv().await,
            #[cfg(windows)]
            Self::CtrlClose(stream) => stream.recv().await,
        }
    }
}

/// Undoes a [`link_to_signals`] registration.
///
/// Cloneable; every clone releases the same registration.
#[derive(Debug, Clone)]
pub struct SignalRelease {
    inner: Arc<ReleaseInner>,
}

#[derive(Debug)]
struct ReleaseInner {
    #[cfg_attr(not(unix), allow(dead_code))]
    signals: Vec<Signal>,
    stop: CancellationToken,
    child: CancellationToken,
    released: AtomicBool,
}

impl SignalRelease {
    /// Stops forwarding, restores the default action of every linked signal
    /// and waits until the child token is cancelled.
    ///
    /// Only the first call has an effect. Later calls wait for the same
    /// completion. A default action that cannot be restored is logged.
    pub async fn release(&self) {
        if !self.inner.released.swap(true, Ordering::SeqCst) {
            tracing::debug!("releasing signal handlers");
            self.inner.stop.cancel();
            self.restore_defaults();
        }
        self.inner.child.cancelled().await;
    }

    #[cfg(unix)]
    fn restore_defaults(&self) {
        for signal in &self.inner.signals {
            if let Err(e) = disposition::restore_default(*signal) {
                tracing::warn!(%signal, error = %e, "failed to restore default signal action");
            }
        }
    }

    // Console control handlers fall back to the default once no listener is
    // left, which dropping the streams already ensures.
    #[cfg(not(unix))]
    fn restore_defaults(&self) {}

    /// Whether `release` was called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

/// Derives a child of `parent` that is cancelled on the first delivery of
/// any signal in `signals`.
///
/// Must be called from within a Tokio runtime. An empty `signals` slice
/// yields a child that only the parent or [`SignalRelease::release`] cancels.
///
/// # Errors
///
/// Returns [`ServerError::Signal`] if there is no runtime or a handler
/// cannot be installed. Nothing stays registered in that case.
pub fn link_to_signals(
    parent: &CancellationToken,
    signals: &[Signal],
) -> ServerResult<(CancellationToken, SignalRelease)> {
    tokio::runtime::Handle::try_current().map_err(|e| ServerError::Signal(io::Error::other(e)))?;

    let mut distinct: Vec<Signal> = Vec::with_capacity(signals.len());
    for signal in signals {
        if !distinct.contains(signal) {
            distinct.push(*signal);
        }
    }

    let streams = distinct
        .iter()
        .map(|signal| SignalStream::register(*signal).map(|stream| (*signal, stream)))
        .collect::<io::Result<Vec<_>>>()
        .map_err(ServerError::Signal)?;

    #[cfg(unix)]
    for signal in &distinct {
        disposition::take_over(*signal);
    }

    let child = parent.child_token();
    let stop = CancellationToken::new();
    let (sender, mut receiver) = mpsc::channel::<Signal>(distinct.len().max(1));

    for (signal, mut stream) in streams {
        let sender = sender.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                        // A full buffer means a cancellation is already pending.
                        let _ = sender.try_send(signal);
                    }
                }
            }
        });
    }
    drop(sender);

    let cancel = child.clone();
    let released = stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            Some(signal) = receiver.recv() => {
                tracing::info!(%signal, "Received signal, cancelling");
            }
            () = released.cancelled() => tracing::debug!("signal link released"),
        }
        cancel.cancel();
    });

    let release = SignalRelease {
        inner: Arc::new(ReleaseInner {
            signals: distinct,
            stop,
            child: child.clone(),
            released: AtomicBool::new(false),
        }),
    };

    Ok((child, release))
}

/// [`link_to_signals`] for process interrupt and termination requests.
///
/// # Errors
///
/// See [`link_to_signals`].
pub fn cancel_on_termination(
    parent: &CancellationToken,
) -> ServerResult<(CancellationToken, SignalRelease)> {
    link_to_signals(parent, &TERMINATION_SIGNALS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }

    #[test]
    fn test_link_requires_runtime() {
        let parent = CancellationToken::new();
        let err = link_to_signals(&parent, &TERMINATION_SIGNALS).unwrap_err();
        assert!(matches!(err, ServerError::Signal(_)));
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (child, release) = cancel_on_termination(&parent).unwrap();

        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), release.release())
            .await
            .expect("release should complete");
    }

    #[tokio::test]
    async fn test_release_cancels_child_not_parent() {
        let parent = CancellationToken::new();
        let (child, release) = cancel_on_termination(&parent).unwrap();

        tokio::time::timeout(Duration::from_secs(1), release.release())
            .await
            .expect("release should complete");

        assert!(release.is_released());
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let parent = CancellationToken::new();
        let (_child, release) = cancel_on_termination(&parent).unwrap();
        let other = release.clone();

        for handle in [&release, &other, &release] {
            tokio::time::timeout(Duration::from_secs(1), handle.release())
                .await
                .expect("release should complete");
        }
    }

    #[tokio::test]
    async fn test_duplicate_signals_are_merged() {
        let parent = CancellationToken::new();
        let (child, release) =
            link_to_signals(&parent, &[Signal::Interrupt, Signal::Interrupt]).unwrap();

        release.release().await;
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_signal_set_waits_for_parent() {
        let parent = CancellationToken::new();
        let (child, release) = link_to_signals(&parent, &[]).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut cancelled = tokio_test::task::spawn(child.cancelled());
        tokio_test::assert_pending!(cancelled.poll());

        parent.cancel();
        assert!(cancelled.is_woken());
        tokio_test::assert_ready!(cancelled.poll());

        release.release().await;
    }

    #[tokio::test]
    async fn test_empty_signal_set_released() {
        let parent = CancellationToken::new();
        let (child, release) = link_to_signals(&parent, &[]).unwrap();
        assert!(!child.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), release.release())
            .await
            .expect("release should complete");
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[cfg(unix)]
    const DISPOSITION_CHILD_ENV: &str = "MICRO_SERVER_DISPOSITION_CHILD";

    #[cfg(unix)]
    #[test]
    fn test_release_restores_default_action() {
        use std::os::unix::process::ExitStatusExt;

        if std::env::var_os(DISPOSITION_CHILD_ENV).is_some() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let parent = CancellationToken::new();
                let (child, release) = link_to_signals(&parent, &[Signal::Hangup]).unwrap();
                release.release().await;
                assert!(child.is_cancelled());

                signal_hook::low_level::raise(Signal::Hangup.raw()).unwrap();
                tokio::time::sleep(Duration::from_secs(2)).await;
            });
            return;
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "shutdown::tests::test_release_restores_default_action",
                "--exact",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(DISPOSITION_CHILD_ENV, "1")
            .status()
            .unwrap();

        assert_eq!(status.signal(), Some(Signal::Hangup.raw()), "{status}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_delivery_cancels_child() {
        let parent = CancellationToken::new();
        let (child, release) = link_to_signals(&parent, &[Signal::Hangup]).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-HUP", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), child.cancelled())
            .await
            .expect("signal should cancel the child");
        assert!(!parent.is_cancelled());

        release.release().await;
    }
}
