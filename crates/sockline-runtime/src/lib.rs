//! # sockline-runtime
//!
//! OS-facing half of the sockline socket engine.
//!
//! This crate provides:
//! - Socket factories and the socket objects they return
//! - The task scheduler that delivers events to user callbacks
//! - The shared poller, an alternative to one I/O thread per socket
//! - Platform syscall and errno adapters
//! - Local interface enumeration
//!
//! ## Event flow
//!
//! ```text
//!   socket I/O thread ─┐
//!   socket I/O thread ─┼─▶ Scheduler::deliver ──▶ scheduler thread ──▶ user callback
//!   shared poller ─────┘         │
//!                                └─ scheduler not started: callback runs inline
//! ```

pub mod config;
pub mod ifaddrs;
pub mod poller;
pub mod runtime;
pub mod scheduler;
pub mod socket;
pub mod sys;

// Re-exports
pub use config::{IoStrategy, NetConfig};
pub use ifaddrs::{list_interfaces, InterfaceResolver};
pub use poller::{PollerStats, SocketPoller};
pub use runtime::Runtime;
pub use scheduler::{Scheduler, SchedulerState, SchedulerStats, SchedulerThread};
pub use socket::{
    create_tcp_client, create_tcp_listen, create_udp_multicast, create_udp_unicast,
    AcceptCallback, ComSocket, ErrorCallback, ListenSocket, PacketCallback,
};
