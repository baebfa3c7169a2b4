//! # sockline-core
//!
//! Core value types for the sockline socket engine.
//!
//! This crate holds no descriptors and spawns no threads. Everything that
//! talks to the OS lives in `sockline-runtime`.
//!
//! ## Modules
//!
//! - `endpoint` - Address family aware IP address + port value
//! - `resolve` - Address/interface name resolution traits
//! - `kind` - Socket kind and lifecycle state
//! - `watchdog` - Inactivity timer with a one-shot callback
//! - `error` - Error taxonomy
//! - `env` - Environment variable utilities

pub mod endpoint;
pub mod env;
pub mod error;
pub mod kind;
pub mod resolve;
pub mod watchdog;

// Re-exports for convenience
pub use endpoint::{Endpoint, Family};
pub use env::{env_get, env_get_millis, env_get_opt};
pub use error::{ConfigError, EndpointError, ErrorKind, SchedulerError, SocketError, SocketResult};
pub use kind::{AtomicSocketState, SocketKind, SocketState};
pub use resolve::{AddressResolver, InterfaceLister, StaticResolver};
pub use watchdog::{TimeoutCallback, Watchdog};

/// Compiled defaults shared by the runtime
pub mod constants {
    /// Default SO_SNDBUF / SO_RCVBUF
    pub const SOCKET_BUFFER: usize = 4096;

    /// Bytes read per receive call
    pub const RECV_CHUNK: usize = 4096;

    /// Pending connection queue of a listen socket
    pub const LISTEN_BACKLOG: i32 = 1;

    /// Readiness wait of the per-socket I/O thread
    pub const READINESS_POLL_MS: u64 = 1;

    /// Upper bound on the `is_open` probe
    pub const LIVENESS_PROBE_MS: u64 = 10_000;

    /// Longest sleep of an idle shared poller
    pub const POLLER_MAX_BACKOFF_MS: u64 = 50;

    /// Longest wait of an idle scheduler
    pub const SCHEDULER_IDLE_MS: u64 = 10;
}
