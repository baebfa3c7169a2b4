//! Socket factories
//!
//! Common setup: create, make non-blocking, apply the default options, bind,
//! then the protocol step (membership, listen or connect). The descriptor is
//! owned from the moment `socket()` returns, so every early return closes it.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use sockline_core::{Endpoint, ErrorKind, Family, SocketError, SocketKind, SocketResult};

use super::{ComSocket, ListenSocket};
use crate::config::NetConfig;
use crate::ifaddrs::interface_index;
use crate::runtime::Runtime;
use crate::sys::errno::{classify, setup_error, Disposition, Op};
use crate::sys::{self, Transport};

/// `(level, name, label)` of every boolean option set on new sockets
const FLAG_OPTIONS: &[(libc::c_int, libc::c_int, &str)] = &[
    (libc::SOL_SOCKET, libc::SO_REUSEADDR, "SO_REUSEADDR"),
    #[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
    (libc::SOL_SOCKET, libc::SO_REUSEPORT, "SO_REUSEPORT"),
    (libc::SOL_SOCKET, libc::SO_KEEPALIVE, "SO_KEEPALIVE"),
];

fn option_error(label: &str, errno: nix::errno::Errno) -> SocketError {
    SocketError::new(
        ErrorKind::Configuration,
        format!("Unable to set socket option {}: {}", label, sys::describe(errno)),
    )
    .with_os_error(errno as i32)
}

/// Address reuse, keepalive and the fixed buffer sizes
pub(super) fn apply_default_options(fd: RawFd, config: &NetConfig) -> SocketResult<()> {
    for &(level, name, label) in FLAG_OPTIONS {
        sys::set_int_option(fd, level, name, 1).map_err(|e| option_error(label, e))?;
    }
    let size = libc::c_int::try_from(config.socket_buffer).unwrap_or(libc::c_int::MAX);
    sys::set_int_option(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, size)
        .map_err(|e| option_error("SO_SNDBUF", e))?;
    sys::set_int_option(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size)
        .map_err(|e| option_error("SO_RCVBUF", e))?;
    Ok(())
}

/// Open, configure and bind a socket
fn open_bound(
    family: Family,
    transport: Transport,
    bind: &Endpoint,
    config: &NetConfig,
) -> SocketResult<OwnedFd> {
    let fd = sys::open(family, transport).map_err(|e| setup_error(Op::Open, e))?;
    let raw = fd.as_raw_fd();
    sys::set_nonblocking(raw).map_err(|e| setup_error(Op::Configure, e))?;
    apply_default_options(raw, config)?;
    sys::bind(raw, bind).map_err(|e| {
        setup_error(
            Op::Bind {
                ephemeral: bind.port() == 0,
            },
            e,
        )
    })?;
    Ok(fd)
}

/// The endpoint actually bound, asking the OS when `requested` left anything open
fn bound_endpoint(fd: RawFd, requested: Endpoint) -> SocketResult<Endpoint> {
    if !requested.is_any() {
        return Ok(requested);
    }
    sys::local_endpoint(fd).map_err(|e| {
        SocketError::new(
            ErrorKind::Generic,
            format!("Could not read local address: {}", sys::describe(e)),
        )
        .with_os_error(e as i32)
    })
}

/// UDP socket bound to `bind`; every send names its destination
pub fn create_udp_unicast(runtime: &Runtime, bind: Endpoint) -> SocketResult<ComSocket> {
    let config = runtime.config();
    let fd = open_bound(bind.family(), Transport::Udp, &bind, config)?;
    let local = bound_endpoint(fd.as_raw_fd(), bind)?;
    ComSocket::start(fd, SocketKind::UdpUnicast, local, Endpoint::UNSPECIFIED, runtime)
}

/// UDP socket joined to `group` on `interface`
///
/// Binds the wildcard address on the group's port; sends always go to the
/// group and leave through `interface` unless it is unspecified.
pub fn create_udp_multicast(
    runtime: &Runtime,
    interface: Endpoint,
    group: Endpoint,
) -> SocketResult<ComSocket> {
    if interface.family() != group.family() {
        return Err(SocketError::new(
            ErrorKind::Configuration,
            "Unable to create socket: interface and multicast group were not specified with the same address family (IPv4/IPv6)",
        ));
    }
    if !group.is_multicast() {
        return Err(SocketError::new(
            ErrorKind::Configuration,
            format!("Unable to create socket: {} is not a multicast group", group),
        ));
    }

    let config = runtime.config();
    let family = group.family();
    let fd = open_bound(family, Transport::Udp, &Endpoint::any(family, group.port()), config)?;
    let raw = fd.as_raw_fd();
    let bound = bound_endpoint(raw, Endpoint::any(family, group.port()))?;
    let local = if interface.ip().is_unspecified() {
        bound
    } else {
        interface.with_port(bound.port())
    };

    let if_index = match family {
        Family::Ipv6 if !interface.ip().is_unspecified() => interface_index(interface.ip()),
        _ => 0,
    };
    sys::join_multicast(raw, &group, &interface, if_index).map_err(|e| {
        SocketError::new(
            ErrorKind::Configuration,
            format!("Unable to join multicast group {}: {}", group, sys::describe(e)),
        )
        .with_os_error(e as i32)
    })?;
    sys::enable_multicast_loop(raw, family).map_err(|e| option_error("MULTICAST_LOOP", e))?;

    ComSocket::start(fd, SocketKind::UdpMulticast, local, group, runtime)
}

/// TCP listener on a concrete address and port
pub fn create_tcp_listen(runtime: &Runtime, bind: Endpoint) -> SocketResult<ListenSocket> {
    if bind.is_any() {
        return Err(SocketError::new(
            ErrorKind::Configuration,
            "Can not bind listen socket to unspecified endpoint",
        ));
    }

    let config = runtime.config();
    let fd = open_bound(bind.family(), Transport::Tcp, &bind, config)?;
    sys::listen(fd.as_raw_fd(), config.listen_backlog)
        .map_err(|e| setup_error(Op::Listen, e))?;
    ListenSocket::start(fd, bind, runtime)
}

/// TCP connection from `bind` to `remote`
///
/// The connect is non-blocking; a connection that later fails is reported
/// through the error callback.
pub fn create_tcp_client(
    runtime: &Runtime,
    bind: Endpoint,
    remote: Endpoint,
) -> SocketResult<ComSocket> {
    if bind.family() != remote.family() {
        return Err(SocketError::new(
            ErrorKind::Configuration,
            "Unable to create socket: local and remote endpoints were not specified with the same address family (IPv4/IPv6)",
        ));
    }

    let config = runtime.config();
    let fd = open_bound(bind.family(), Transport::Tcp, &bind, config)?;
    let raw = fd.as_raw_fd();
    let local = bound_endpoint(raw, bind)?;

    if let Err(errno) = sys::connect(raw, &remote) {
        match classify(Op::Connect, errno) {
            Disposition::Retry | Disposition::Skip => {
                tracing::trace!(remote = %remote, "connect in progress");
            }
            Disposition::Fail(_) => return Err(setup_error(Op::Connect, errno)),
        }
    }

    ComSocket::start(fd, SocketKind::TcpClient, local, remote, runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockline_core::SocketState;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    fn runtime() -> Runtime {
        Runtime::new(NetConfig::new()).unwrap()
    }

    fn ep(addr: &str, port: u16) -> Endpoint {
        Endpoint::new(addr, port).unwrap()
    }

    #[test]
    fn test_listen_rejects_unspecified() {
        let rt = runtime();
        let err = create_tcp_listen(&rt, ep("127.0.0.1", 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = create_tcp_listen(&rt, ep("0.0.0.0", 5110)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_client_rejects_family_mismatch() {
        let rt = runtime();
        let err = create_tcp_client(&rt, ep("127.0.0.1", 0), ep("::1", 5111)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_multicast_preconditions() {
        let rt = runtime();
        let err = create_udp_multicast(&rt, ep("0.0.0.0", 0), ep("ff02::1", 5112)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = create_udp_multicast(&rt, ep("0.0.0.0", 0), ep("10.0.0.1", 5112)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_multicast_send_receive() {
        let rt = runtime();
        let interface = ep("127.0.0.1", 0);
        let group = ep("239.255.42.99", 5199);
        let sock = create_udp_multicast(&rt, interface, group).unwrap();
        assert_eq!(sock.kind(), SocketKind::UdpMulticast);
        assert_eq!(sock.remote_endpoint(), group);
        assert_eq!(sock.local_endpoint(), ep("127.0.0.1", 5199));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        sock.on_packet(move |payload, from| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send((payload.to_vec(), from));
            }
        });

        // the remote argument is ignored: sends go to the group
        sock.send(b"Hello Group", Some(ep("127.0.0.1", 9)));
        let (payload, from) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(payload, b"Hello Group");
        assert_eq!(from.ip(), interface.ip());
        assert_eq!(from.port(), 5199);
        assert_eq!(sock.state(), SocketState::Open);
    }

    #[test]
    fn test_bind_in_use_is_bind_error() {
        let rt = runtime();
        let udp = create_udp_unicast(&rt, ep("127.0.0.1", 0)).unwrap();
        // a socket without the reuse options may not share the port
        let raw = sys::open(Family::Ipv4, Transport::Udp).unwrap();
        let errno = sys::bind(raw.as_raw_fd(), &udp.local_endpoint()).unwrap_err();
        assert_eq!(
            setup_error(Op::Bind { ephemeral: false }, errno).kind(),
            ErrorKind::Bind
        );
    }

    #[test]
    fn test_default_options_applied() {
        let rt = runtime();
        let sock = create_udp_unicast(&rt, ep("127.0.0.1", 0)).unwrap();
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                sock.native_socket(),
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &mut value as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        assert_eq!(ret, 0);
        assert_ne!(value, 0);
    }

    #[test]
    fn test_unicast_resolves_ephemeral_port() {
        let rt = runtime();
        let sock = create_udp_unicast(&rt, ep("127.0.0.1", 0)).unwrap();
        let local = sock.local_endpoint();
        assert_eq!(local.octets(), &[127, 0, 0, 1]);
        assert_ne!(local.port(), 0);
    }
}
