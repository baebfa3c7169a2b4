//! # sockline - callback-driven UDP/TCP sockets
//!
//! Raw OS sockets behind one small, uniform interface: create a socket,
//! register callbacks, send bytes. Reads, accepts, inactivity timeouts and
//! errors arrive through the callbacks.
//!
//! ## Features
//!
//! - **UDP unicast and multicast**, **TCP client, server and listener**
//! - **IPv4 and IPv6** through one `Endpoint` value type
//! - **Two I/O strategies**: a thread per socket, or one shared poller thread
//! - **Serialized delivery**: with the scheduler running, all callbacks run on
//!   its thread, never on the I/O thread that saw the event
//! - **Inactivity watchdog** per socket
//!
//! ## Quick Start
//!
//! ```ignore
//! use sockline::{create_udp_unicast, Endpoint, Runtime};
//!
//! let _scheduler = Runtime::global().scheduler().spawn()?;
//!
//! let a = create_udp_unicast(Endpoint::new("127.0.0.1", 0)?)?;
//! let b = create_udp_unicast(Endpoint::new("127.0.0.1", 0)?)?;
//!
//! a.on_packet(|payload, from| {
//!     println!("{} bytes from {}", payload.len(), from);
//! });
//! a.on_socket_error(|e| eprintln!("socket failed: {}", e));
//!
//! b.send(b"Hello World", Some(a.local_endpoint()));
//! ```
//!
//! ## Runtimes
//!
//! The free functions below use [`Runtime::global`], configured from
//! `SOCKLINE_*` environment variables. Build a [`Runtime`] from a
//! [`NetConfig`] for isolated services, e.g. in tests.
//!
//! ## Errors
//!
//! Construction fails synchronously with a [`SocketError`]. Anything that
//! goes wrong later is reported once through `on_socket_error`, after which
//! the socket is closed.

// Re-export core types
pub use sockline_core::{
    AddressResolver,
    Endpoint,
    EndpointError,
    ErrorKind,
    Family,
    InterfaceLister,
    SchedulerError,
    ConfigError,
    SocketError,
    SocketKind,
    SocketResult,
    SocketState,
    StaticResolver,
    Watchdog,
};

// Re-export env utilities
pub use sockline_core::{env_get, env_get_millis, env_get_opt};

// Re-export runtime types
pub use sockline_runtime::{
    AcceptCallback,
    ComSocket,
    ErrorCallback,
    InterfaceResolver,
    IoStrategy,
    ListenSocket,
    NetConfig,
    PacketCallback,
    PollerStats,
    Runtime,
    Scheduler,
    SchedulerState,
    SchedulerStats,
    SchedulerThread,
    SocketPoller,
    list_interfaces,
};

/// UDP socket bound to `bind` on the global runtime
///
/// A port of 0 picks an ephemeral port; `local_endpoint()` reports it.
pub fn create_udp_unicast(bind: Endpoint) -> SocketResult<ComSocket> {
    Runtime::global().create_udp_unicast(bind)
}

/// UDP socket joined to multicast `group` via `interface`, on the global runtime
pub fn create_udp_multicast(interface: Endpoint, group: Endpoint) -> SocketResult<ComSocket> {
    Runtime::global().create_udp_multicast(interface, group)
}

/// TCP listener on the global runtime
///
/// `bind` must name a concrete address and port.
pub fn create_tcp_listen(bind: Endpoint) -> SocketResult<ListenSocket> {
    Runtime::global().create_tcp_listen(bind)
}

/// TCP client connecting from `bind` to `remote` on the global runtime
pub fn create_tcp_client(bind: Endpoint, remote: Endpoint) -> SocketResult<ComSocket> {
    Runtime::global().create_tcp_client(bind, remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_global_factories() {
        let a = create_udp_unicast(Endpoint::new("localhost", 0).unwrap()).unwrap();
        let b = create_udp_unicast(Endpoint::new("127.0.0.1", 0).unwrap()).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        a.on_packet(move |payload, from| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send((payload.to_vec(), from));
            }
        });

        b.send(b"Hello World", Some(a.local_endpoint()));
        let (payload, from) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(payload, b"Hello World");
        assert_eq!(from, b.local_endpoint());
    }

    #[test]
    fn test_global_listen_rejects_any() {
        let err = create_tcp_listen(Endpoint::new("any", 5120).unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
