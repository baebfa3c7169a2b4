//! Data sockets: UDP unicast/multicast, TCP client and accepted TCP server

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use sockline_core::{Endpoint, ErrorKind, SocketError, SocketKind, SocketResult, SocketState};

use super::factory::apply_default_options;
use super::{lock, Driver, ErrorCallback, PacketCallback, Pollable, SocketCore, Step};
use crate::poller::PollTarget;
use crate::runtime::Runtime;
use crate::sys;
use crate::sys::errno::{classify, setup_error, Disposition, Op};

pub(crate) struct ComShared {
    core: SocketCore,
    on_packet: Mutex<Option<PacketCallback>>,
    /// Receive buffer; holding it is what makes a reader exclusive
    buffer: Mutex<Vec<u8>>,
}

impl ComShared {
    pub(crate) fn new(core: SocketCore, recv_chunk: usize) -> Self {
        Self {
            core,
            on_packet: Mutex::new(None),
            buffer: Mutex::new(vec![0u8; recv_chunk]),
        }
    }

    fn deliver_packet(self: &Arc<Self>, payload: Vec<u8>, from: Endpoint) {
        let weak = Arc::downgrade(self);
        self.core.scheduler().deliver(move || {
            let Some(socket) = weak.upgrade() else {
                return;
            };
            let cb = lock(&socket.on_packet).clone();
            if let Some(cb) = cb {
                cb(&payload, from);
            }
        });
    }

    /// One non-blocking receive
    pub(crate) fn read_step(self: &Arc<Self>) -> Step {
        let mut buffer = match self.buffer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return Step::Idle,
        };
        if !self.core.is_open() {
            return Step::Closed;
        }

        let fd = self.core.raw_fd();
        let connected = self.core.kind().is_stream();
        let received = if connected {
            sys::recv(fd, &mut buffer).map(|n| (n, self.core.remote()))
        } else {
            sys::recv_from(fd, &mut buffer)
        };

        match received {
            Ok((0, _)) if connected => {
                drop(buffer);
                self.core.fail(SocketError::new(
                    ErrorKind::BrokenPipe,
                    "Could not read socket: connection closed by peer",
                ));
                Step::Closed
            }
            Ok((n, from)) => {
                self.core.mark_active();
                tracing::trace!(fd, bytes = n, from = %from, "packet received");
                // still holding the buffer, so deliveries keep their order
                self.deliver_packet(buffer[..n].to_vec(), from);
                Step::Busy
            }
            Err(errno) => match classify(Op::Read, errno) {
                Disposition::Retry => Step::Idle,
                Disposition::Skip => Step::Busy,
                Disposition::Fail(_) => {
                    drop(buffer);
                    self.core.fail_with(Op::Read, errno);
                    Step::Closed
                }
            },
        }
    }

    fn send(&self, payload: &[u8], remote: Option<Endpoint>) {
        let core = &self.core;
        if !core.is_open() {
            core.report(SocketError::new(
                ErrorKind::BrokenPipe,
                "Can not send message: socket was closed",
            ));
            return;
        }

        let fd = core.raw_fd();
        let sent = match core.kind() {
            SocketKind::UdpMulticast => sys::send_to(fd, payload, &core.remote()),
            SocketKind::UdpUnicast => match remote {
                Some(to) => sys::send_to(fd, payload, &to),
                None => {
                    core.fail(SocketError::new(
                        ErrorKind::Configuration,
                        "Could not send on socket: UDP unicast needs a remote endpoint",
                    ));
                    return;
                }
            },
            _ => sys::send(fd, payload),
        };

        if let Err(errno) = sent {
            match classify(Op::Send, errno) {
                Disposition::Retry | Disposition::Skip => {
                    tracing::trace!(fd, bytes = payload.len(), "send would block, dropped");
                }
                Disposition::Fail(_) => core.fail_with(Op::Send, errno),
            }
        }
    }
}

impl Pollable for ComShared {
    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn step(self: &Arc<Self>) -> Step {
        self.read_step()
    }
}

struct ComInner {
    // declared first: the driver must stop while the descriptor is still owned
    driver: Driver,
    shared: Arc<ComShared>,
}

/// Handle to a data socket
///
/// Clones refer to the same socket. The socket closes when the last clone
/// is dropped.
#[derive(Clone)]
pub struct ComSocket {
    inner: Arc<ComInner>,
}

impl ComSocket {
    /// Wrap a configured descriptor and start driving it
    pub(crate) fn start(
        fd: OwnedFd,
        kind: SocketKind,
        local: Endpoint,
        remote: Endpoint,
        runtime: &Runtime,
    ) -> SocketResult<Self> {
        let core = SocketCore::new(fd, kind, local, remote, runtime);
        let shared = Arc::new(ComShared::new(core, runtime.config().recv_chunk));
        let driver = Driver::start(&shared, PollTarget::Readable, runtime)?;
        tracing::debug!(
            kind = %kind,
            local = %local,
            remote = %remote,
            "socket open"
        );
        Ok(Self {
            inner: Arc::new(ComInner { driver, shared }),
        })
    }

    /// Wrap a descriptor returned by `accept`
    pub(crate) fn accepted(fd: OwnedFd, peer: Endpoint, runtime: &Runtime) -> SocketResult<Self> {
        let raw = fd.as_raw_fd();
        sys::set_nonblocking(raw).map_err(|e| setup_error(Op::Configure, e))?;
        apply_default_options(raw, runtime.config())?;
        let local = sys::local_endpoint(raw).unwrap_or_default();
        Self::start(fd, SocketKind::TcpServer, local, peer, runtime)
    }

    fn core(&self) -> &SocketCore {
        &self.inner.shared.core
    }

    /// Register the packet callback, replacing any previous one
    pub fn on_packet<F>(&self, cb: F)
    where
        F: Fn(&[u8], Endpoint) + Send + Sync + 'static,
    {
        let cb: PacketCallback = Arc::new(cb);
        *lock(&self.inner.shared.on_packet) = Some(cb);
    }

    /// Register the error callback, replacing any previous one
    pub fn on_socket_error<F>(&self, cb: F)
    where
        F: Fn(SocketError) + Send + Sync + 'static,
    {
        let cb: ErrorCallback = Arc::new(cb);
        self.core().set_error_callback(cb);
    }

    /// Send one payload
    ///
    /// Multicast sockets always send to their group and connected sockets to
    /// their peer, ignoring `remote`. UDP unicast sockets require `remote`.
    /// Failures are reported through the error callback; a send that would
    /// block is dropped silently.
    pub fn send(&self, payload: &[u8], remote: Option<Endpoint>) {
        self.inner.shared.send(payload, remote);
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.core().local_endpoint()
    }

    /// Fixed peer or group; unspecified for UDP unicast
    pub fn remote_endpoint(&self) -> Endpoint {
        self.core().remote()
    }

    pub fn kind(&self) -> SocketKind {
        self.core().kind()
    }

    pub fn state(&self) -> SocketState {
        self.core().state()
    }

    /// Open and writable within the liveness probe time
    ///
    /// Blocks for up to the configured probe time (10s by default). A failed
    /// probe closes the socket and reports the reason.
    pub fn is_open(&self) -> bool {
        self.core().probe_writable()
    }

    /// Close the socket after `timeout` without received traffic; zero disables
    pub fn set_timeout(&self, timeout: Duration) {
        self.core().set_timeout(timeout);
    }

    pub fn native_socket(&self) -> RawFd {
        self.core().raw_fd()
    }
}

impl fmt::Debug for ComSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComSocket")
            .field("kind", &self.kind())
            .field("fd", &self.native_socket())
            .field("remote", &self.remote_endpoint())
            .field("state", &self.state())
            .finish()
    }
}
