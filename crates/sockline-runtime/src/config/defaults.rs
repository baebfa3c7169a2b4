//! Library defaults for [`NetConfig`](super::NetConfig)
//!
//! Every value here can be overridden at runtime through the matching
//! `SOCKLINE_*` environment variable.

use sockline_core::constants;

use super::IoStrategy;

/// How sockets get their I/O driven
pub const IO_STRATEGY: IoStrategy = IoStrategy::ThreadPerSocket;

/// SO_SNDBUF / SO_RCVBUF in bytes
pub const SOCKET_BUFFER: usize = constants::SOCKET_BUFFER;

/// Bytes read per receive call
pub const RECV_CHUNK: usize = constants::RECV_CHUNK;

/// Pending connection queue length of listen sockets
pub const LISTEN_BACKLOG: i32 = constants::LISTEN_BACKLOG;

/// Readiness wait of a per-socket I/O thread
pub const READINESS_POLL_MS: u64 = constants::READINESS_POLL_MS;

/// Upper bound of the `is_open` liveness probe
pub const LIVENESS_PROBE_MS: u64 = constants::LIVENESS_PROBE_MS;

/// Inactivity timeout applied to new sockets, 0 = disabled
pub const DEFAULT_TIMEOUT_MS: u64 = 0;

/// Longest sleep of an idle shared poller
pub const POLLER_MAX_BACKOFF_MS: u64 = constants::POLLER_MAX_BACKOFF_MS;

/// Longest wait of an idle scheduler
pub const SCHEDULER_IDLE_MS: u64 = constants::SCHEDULER_IDLE_MS;
