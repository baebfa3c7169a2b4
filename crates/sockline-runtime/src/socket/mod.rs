//! Socket objects
//!
//! Each socket is split in two:
//!
//! - a shared part (`ComShared` / `ListenShared`) holding the descriptor,
//!   lifecycle state, callbacks and watchdog. I/O drivers and queued
//!   deliveries only ever hold a `Weak` to it.
//! - a user handle (`ComSocket` / `ListenSocket`) that owns the I/O driver.
//!   Dropping the last handle stops the driver, then releases the shared part
//!   and with it the descriptor.
//!
//! A delivery whose socket is gone by the time the scheduler runs it fails to
//! upgrade its `Weak` and does nothing.

mod com;
mod factory;
mod listen;

pub use com::ComSocket;
pub use factory::{create_tcp_client, create_tcp_listen, create_udp_multicast, create_udp_unicast};
pub use listen::ListenSocket;

pub(crate) use com::ComShared;
pub(crate) use listen::ListenShared;

use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;

use sockline_core::{
    AtomicSocketState, Endpoint, ErrorKind, SocketError, SocketKind, SocketResult, SocketState,
    Watchdog,
};

use crate::config::IoStrategy;
use crate::poller::{PollTarget, SocketPoller};
use crate::runtime::Runtime;
use crate::scheduler::Scheduler;
use crate::sys;
use crate::sys::errno::{classify, to_error, Disposition, Op};

/// Receives every fatal error of a socket, at most once
pub type ErrorCallback = Arc<dyn Fn(SocketError) + Send + Sync>;

/// Receives each packet with its sender (or the connected peer)
pub type PacketCallback = Arc<dyn Fn(&[u8], Endpoint) + Send + Sync>;

/// Receives each accepted connection with its remote endpoint
pub type AcceptCallback = Arc<dyn Fn(ComSocket, Endpoint) + Send + Sync>;

#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of one non-blocking I/O attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Something was read or accepted
    Busy,
    /// Nothing pending
    Idle,
    /// The socket is no longer open
    Closed,
}

/// State shared by every socket kind
pub(crate) struct SocketCore {
    fd: OwnedFd,
    kind: SocketKind,
    state: AtomicSocketState,
    local: Mutex<Endpoint>,
    remote: Endpoint,
    watchdog: Mutex<Watchdog>,
    on_error: Mutex<Option<ErrorCallback>>,
    scheduler: Scheduler,
    readiness_poll: Duration,
    liveness_probe: Duration,
    /// Queued error deliveries hold a `Weak` to this and skip once it is gone
    liveness: Arc<()>,
}

impl SocketCore {
    pub(crate) fn new(
        fd: OwnedFd,
        kind: SocketKind,
        local: Endpoint,
        remote: Endpoint,
        runtime: &Runtime,
    ) -> Self {
        let config = runtime.config();
        Self {
            fd,
            kind,
            state: AtomicSocketState::new(),
            local: Mutex::new(local),
            remote,
            watchdog: Mutex::new(Watchdog::with_timeout(config.default_timeout, None)),
            on_error: Mutex::new(None),
            scheduler: runtime.scheduler().clone(),
            readiness_poll: config.readiness_poll,
            liveness_probe: config.liveness_probe,
            liveness: Arc::new(()),
        }
    }

    #[inline]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    #[inline]
    pub(crate) fn kind(&self) -> SocketKind {
        self.kind
    }

    #[inline]
    pub(crate) fn remote(&self) -> Endpoint {
        self.remote
    }

    #[inline]
    pub(crate) fn state(&self) -> SocketState {
        self.state.load()
    }

    #[inline]
    pub(crate) fn is_open(&self) -> bool {
        self.state.is_open()
    }

    #[inline]
    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Local endpoint, asking the OS once more while it is still unspecified
    pub(crate) fn local_endpoint(&self) -> Endpoint {
        let mut local = lock(&self.local);
        if local.is_any() {
            if let Ok(bound) = sys::local_endpoint(self.raw_fd()) {
                *local = bound;
            }
        }
        *local
    }

    pub(crate) fn set_error_callback(&self, cb: ErrorCallback) {
        *lock(&self.on_error) = Some(cb);
    }

    /// Zero disables the timeout. Restarts the inactivity clock.
    pub(crate) fn set_timeout(&self, timeout: Duration) {
        let mut watchdog = lock(&self.watchdog);
        watchdog.set_timeout(timeout);
        watchdog.reset();
    }

    #[inline]
    pub(crate) fn mark_active(&self) {
        lock(&self.watchdog).reset();
    }

    /// Returns `false` and closes the socket with `Timeout` once the watchdog expired
    pub(crate) fn check_watchdog(&self) -> bool {
        let alive = lock(&self.watchdog).check();
        if !alive {
            self.fail(SocketError::new(
                ErrorKind::Timeout,
                "no activity within the configured timeout",
            ));
        }
        alive
    }

    /// Idle handling of a dedicated I/O thread
    ///
    /// Waits briefly for readability; only when that wait also times out is
    /// the watchdog consulted. Returns `false` when the loop should exit.
    pub(crate) fn wait_readable(&self) -> bool {
        match sys::poll_one(self.fd.as_fd(), libc::POLLIN, self.readiness_poll) {
            Ok(Some(_)) => true,
            Ok(None) => self.check_watchdog() && self.is_open(),
            Err(Errno::EINTR) => true,
            Err(errno) => {
                self.fail_with(Op::Probe, errno);
                false
            }
        }
    }

    /// Bounded write-readiness probe
    pub(crate) fn probe_writable(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        match sys::poll_one(self.fd.as_fd(), libc::POLLOUT, self.liveness_probe) {
            Ok(Some(revents)) if revents == libc::POLLOUT => true,
            Ok(Some(_)) => {
                self.fail(SocketError::new(
                    ErrorKind::BrokenPipe,
                    "Unable to poll connection: peer hung up or socket errored",
                ));
                false
            }
            Ok(None) => {
                self.fail(SocketError::new(
                    ErrorKind::Timeout,
                    "Unable to poll connection: not writable within the probe time",
                ));
                false
            }
            Err(errno) => {
                self.fail_with(Op::Probe, errno);
                false
            }
        }
    }

    /// Close the socket after a fatal `errno` of `op`
    pub(crate) fn fail_with(&self, op: Op, errno: Errno) {
        let kind = match classify(op, errno) {
            Disposition::Fail(kind) => kind,
            Disposition::Retry | Disposition::Skip => ErrorKind::Generic,
        };
        self.fail(to_error(op, kind, errno));
    }

    /// Open -> Closing -> Closed, then notify the error callback
    ///
    /// Only the first caller gets through; later failures are ignored.
    pub(crate) fn fail(&self, error: SocketError) {
        if !self.state.transition(SocketState::Open, SocketState::Closing) {
            return;
        }
        // wake any reader; the descriptor itself is released on drop
        let _ = sys::shutdown(self.raw_fd());
        self.state.transition(SocketState::Closing, SocketState::Closed);
        tracing::debug!(
            kind = %self.kind,
            fd = self.raw_fd(),
            error = %error,
            "socket closed"
        );
        self.report(error);
    }

    /// Hand an error to the callback without changing state
    pub(crate) fn report(&self, error: SocketError) {
        // release the slot first: an inline callback may re-enter the socket
        let cb = lock(&self.on_error).clone();
        if let Some(cb) = cb {
            let alive = Arc::downgrade(&self.liveness);
            self.scheduler.deliver(move || {
                if alive.upgrade().is_some() {
                    cb(error);
                }
            });
        }
    }
}

impl Drop for SocketCore {
    fn drop(&mut self) {
        if self.state.transition(SocketState::Open, SocketState::Closing) {
            self.state.transition(SocketState::Closing, SocketState::Closed);
        }
        tracing::trace!(kind = %self.kind, fd = self.fd.as_raw_fd(), "socket released");
    }
}

/// Something with a non-blocking I/O step
pub(crate) trait Pollable: Send + Sync + 'static {
    fn core(&self) -> &SocketCore;
    fn step(self: &Arc<Self>) -> Step;
}

/// Who drives a socket's reads or accepts
pub(crate) enum Driver {
    Thread {
        running: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    },
    Poller {
        poller: SocketPoller,
        fd: RawFd,
    },
}

impl Driver {
    /// Start driving `target` with the runtime's I/O strategy
    pub(crate) fn start<T: Pollable>(
        target: &Arc<T>,
        wrap: fn(Weak<T>) -> PollTarget,
        runtime: &Runtime,
    ) -> SocketResult<Self> {
        let weak = Arc::downgrade(target);
        match runtime.config().io_strategy {
            IoStrategy::ThreadPerSocket => {
                let running = Arc::new(AtomicBool::new(true));
                let flag = Arc::clone(&running);
                let handle = thread::Builder::new()
                    .name(format!("sockline-{}", target.core().kind()))
                    .spawn(move || io_loop(weak, flag))
                    .map_err(|e| {
                        SocketError::new(
                            ErrorKind::HandleLimit,
                            format!("Unable to start I/O thread: {}", e),
                        )
                    })?;
                Ok(Driver::Thread {
                    running,
                    handle: Some(handle),
                })
            }
            IoStrategy::SharedPoller => {
                let fd = target.core().raw_fd();
                runtime.poller().register(fd, wrap(weak))?;
                Ok(Driver::Poller {
                    poller: runtime.poller().clone(),
                    fd,
                })
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        match self {
            Driver::Thread { running, handle } => {
                running.store(false, Ordering::Release);
                if let Some(handle) = handle.take() {
                    // dropped from its own callback: let the loop wind down alone
                    if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                        tracing::error!("socket I/O thread panicked");
                    }
                }
            }
            Driver::Poller { poller, fd } => poller.deregister(*fd),
        }
    }
}

/// Body of a dedicated I/O thread
fn io_loop<T: Pollable>(target: Weak<T>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        let Some(target) = target.upgrade() else {
            break;
        };
        match target.step() {
            Step::Busy => {}
            Step::Closed => break,
            Step::Idle => {
                if !target.core().wait_readable() {
                    break;
                }
            }
        }
    }
    tracing::trace!("socket I/O thread exiting");
}
