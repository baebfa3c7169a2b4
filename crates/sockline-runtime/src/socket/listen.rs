//! TCP listen sockets

use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use sockline_core::{Endpoint, SocketError, SocketKind, SocketResult, SocketState};

use super::{lock, AcceptCallback, ComSocket, Driver, ErrorCallback, Pollable, SocketCore, Step};
use crate::poller::PollTarget;
use crate::runtime::Runtime;
use crate::sys;
use crate::sys::errno::{classify, Disposition, Op};

pub(crate) struct ListenShared {
    core: SocketCore,
    on_accept: Mutex<Option<AcceptCallback>>,
    /// Accepted connections are started with the listener's runtime
    runtime: Runtime,
    /// Held while accepting; makes the accepting side exclusive
    accepting: Mutex<()>,
}

impl ListenShared {
    fn deliver_accept(self: &Arc<Self>, socket: ComSocket, peer: Endpoint) {
        let weak = Arc::downgrade(self);
        self.core.scheduler().deliver(move || {
            let Some(listener) = weak.upgrade() else {
                return;
            };
            let cb = lock(&listener.on_accept).clone();
            if let Some(cb) = cb {
                cb(socket, peer);
            }
        });
    }

    /// One non-blocking accept
    pub(crate) fn accept_step(self: &Arc<Self>) -> Step {
        let _accepting = match self.accepting.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return Step::Idle,
        };
        if !self.core.is_open() {
            return Step::Closed;
        }

        match sys::accept(self.core.raw_fd()) {
            Ok((fd, peer)) => {
                self.core.mark_active();
                match ComSocket::accepted(fd, peer, &self.runtime) {
                    Ok(socket) => {
                        tracing::debug!(peer = %peer, "connection accepted");
                        self.deliver_accept(socket, peer);
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "dropping accepted connection");
                    }
                }
                Step::Busy
            }
            Err(errno) => match classify(Op::Accept, errno) {
                Disposition::Retry => Step::Idle,
                Disposition::Skip => Step::Busy,
                Disposition::Fail(_) => {
                    self.core.fail_with(Op::Accept, errno);
                    Step::Closed
                }
            },
        }
    }
}

impl Pollable for ListenShared {
    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn step(self: &Arc<Self>) -> Step {
        self.accept_step()
    }
}

struct ListenInner {
    // declared first: the driver must stop while the descriptor is still owned
    driver: Driver,
    shared: Arc<ListenShared>,
}

/// Handle to a TCP listen socket
///
/// Clones refer to the same socket. The socket closes when the last clone
/// is dropped.
#[derive(Clone)]
pub struct ListenSocket {
    inner: Arc<ListenInner>,
}

impl ListenSocket {
    pub(crate) fn start(fd: OwnedFd, local: Endpoint, runtime: &Runtime) -> SocketResult<Self> {
        let core = SocketCore::new(
            fd,
            SocketKind::TcpListen,
            local,
            Endpoint::UNSPECIFIED,
            runtime,
        );
        let shared = Arc::new(ListenShared {
            core,
            on_accept: Mutex::new(None),
            runtime: runtime.clone(),
            accepting: Mutex::new(()),
        });
        let driver = Driver::start(&shared, PollTarget::Acceptable, runtime)?;
        tracing::debug!(local = %local, "listen socket open");
        Ok(Self {
            inner: Arc::new(ListenInner { driver, shared }),
        })
    }

    fn core(&self) -> &SocketCore {
        &self.inner.shared.core
    }

    /// Register the accept callback, replacing any previous one
    ///
    /// Connections accepted while no callback is registered are closed.
    pub fn on_accept<F>(&self, cb: F)
    where
        F: Fn(ComSocket, Endpoint) + Send + Sync + 'static,
    {
        let cb: AcceptCallback = Arc::new(cb);
        *lock(&self.inner.shared.on_accept) = Some(cb);
    }

    /// Register the error callback, replacing any previous one
    pub fn on_socket_error<F>(&self, cb: F)
    where
        F: Fn(SocketError) + Send + Sync + 'static,
    {
        let cb: ErrorCallback = Arc::new(cb);
        self.core().set_error_callback(cb);
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.core().local_endpoint()
    }

    /// Always unspecified for a listener
    pub fn remote_endpoint(&self) -> Endpoint {
        self.core().remote()
    }

    pub fn kind(&self) -> SocketKind {
        SocketKind::TcpListen
    }

    pub fn state(&self) -> SocketState {
        self.core().state()
    }

    /// Listeners have nothing to write to, so this only reports the state
    pub fn is_open(&self) -> bool {
        self.core().is_open()
    }

    /// Close the listener after `timeout` without an accepted connection; zero disables
    pub fn set_timeout(&self, timeout: Duration) {
        self.core().set_timeout(timeout);
    }

    pub fn native_socket(&self) -> RawFd {
        self.core().raw_fd()
    }
}

impl fmt::Debug for ListenSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenSocket")
            .field("fd", &self.native_socket())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IoStrategy, NetConfig};
    use crate::socket::{create_tcp_client, create_tcp_listen};
    use sockline_core::ErrorKind;
    use std::sync::mpsc;

    fn runtime(strategy: IoStrategy) -> Runtime {
        Runtime::new(NetConfig::new().io_strategy(strategy)).unwrap()
    }

    fn loopback(port: u16) -> Endpoint {
        Endpoint::new("127.0.0.1", port).unwrap()
    }

    fn accept_and_echo(rt: &Runtime, port: u16) {
        let listener = create_tcp_listen(rt, loopback(port)).unwrap();
        assert_eq!(listener.local_endpoint().port(), port);

        let (accept_tx, accept_rx) = mpsc::channel();
        let (packet_tx, packet_rx) = mpsc::channel();
        let accept_tx = Mutex::new(accept_tx);
        let packet_tx = Mutex::new(packet_tx);
        listener.on_accept(move |server, remote| {
            let packet_tx = Mutex::new(lock(&packet_tx).clone());
            server.on_packet(move |payload, from| {
                let _ = lock(&packet_tx).send((payload.to_vec(), from));
            });
            let _ = lock(&accept_tx).send((server, remote));
        });

        let client = create_tcp_client(rt, loopback(0), loopback(port)).unwrap();
        let (server, remote) = accept_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(remote, client.local_endpoint());
        assert_eq!(server.kind(), SocketKind::TcpServer);
        assert_eq!(server.remote_endpoint(), remote);
        assert_eq!(server.local_endpoint(), loopback(port));

        client.send(b"over the wire", None);
        let (payload, from) = packet_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(payload, b"over the wire");
        assert_eq!(from, remote);
    }

    #[test]
    fn test_tcp_accept_thread_per_socket() {
        accept_and_echo(&runtime(IoStrategy::ThreadPerSocket), 5100);
    }

    #[test]
    fn test_tcp_accept_shared_poller() {
        accept_and_echo(&runtime(IoStrategy::SharedPoller), 5101);
    }

    #[test]
    fn test_listener_state_only_liveness() {
        let rt = runtime(IoStrategy::ThreadPerSocket);
        let listener = create_tcp_listen(&rt, loopback(5103)).unwrap();
        assert!(listener.is_open());
        assert_eq!(listener.kind(), SocketKind::TcpListen);
        assert_eq!(listener.remote_endpoint(), Endpoint::UNSPECIFIED);
    }

    #[test]
    fn test_listener_timeout() {
        let rt = runtime(IoStrategy::ThreadPerSocket);
        let listener = create_tcp_listen(&rt, loopback(5104)).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        listener.on_socket_error(move |e| {
            let _ = lock(&tx).send(e.kind());
        });
        listener.set_timeout(Duration::from_millis(20));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            ErrorKind::Timeout
        );
        assert!(!listener.is_open());
    }
}
