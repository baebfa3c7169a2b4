//! Socket kind and lifecycle state

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// What a socket was created as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Unspecified,
    UdpUnicast,
    UdpMulticast,
    TcpListen,
    /// Server side of an accepted connection
    TcpServer,
    TcpClient,
}

impl SocketKind {
    #[inline]
    pub const fn is_datagram(&self) -> bool {
        matches!(self, SocketKind::UdpUnicast | SocketKind::UdpMulticast)
    }

    /// Connection-oriented data socket
    #[inline]
    pub const fn is_stream(&self) -> bool {
        matches!(self, SocketKind::TcpServer | SocketKind::TcpClient)
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketKind::Unspecified => "unspecified",
            SocketKind::UdpUnicast => "udp-unicast",
            SocketKind::UdpMulticast => "udp-multicast",
            SocketKind::TcpListen => "tcp-listen",
            SocketKind::TcpServer => "tcp-server",
            SocketKind::TcpClient => "tcp-client",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a socket
///
/// Moves forward only: `Open -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SocketState {
    /// Usable, I/O is being driven
    Open = 0,

    /// A failure is being reported, no more I/O
    Closing = 1,

    /// Terminal; the error callback (if any) has been handed off
    Closed = 2,
}

impl SocketState {
    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, SocketState::Open)
    }

    /// Whether `self -> next` is a legal single step
    #[inline]
    pub const fn can_transition_to(&self, next: SocketState) -> bool {
        matches!(
            (self, next),
            (SocketState::Open, SocketState::Closing) | (SocketState::Closing, SocketState::Closed)
        )
    }
}

impl From<u8> for SocketState {
    fn from(v: u8) -> Self {
        match v {
            0 => SocketState::Open,
            1 => SocketState::Closing,
            _ => SocketState::Closed,
        }
    }
}

impl From<SocketState> for u8 {
    fn from(state: SocketState) -> u8 {
        state as u8
    }
}

/// Lock-free holder for a [`SocketState`]
#[derive(Debug)]
pub struct AtomicSocketState(AtomicU8);

impl Default for AtomicSocketState {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicSocketState {
    /// Starts out `Open`
    pub const fn new() -> Self {
        Self(AtomicU8::new(SocketState::Open as u8))
    }

    #[inline]
    pub fn load(&self) -> SocketState {
        SocketState::from(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.load().is_open()
    }

    /// Attempt a single legal step from `from` to `to`
    ///
    /// Returns `true` only for the caller that performed the step, so at most
    /// one thread wins each transition.
    pub fn transition(&self, from: SocketState, to: SocketState) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_state_roundtrip_u8() {
        for s in [SocketState::Open, SocketState::Closing, SocketState::Closed] {
            assert_eq!(SocketState::from(u8::from(s)), s);
        }
    }

    #[test]
    fn test_forward_only() {
        let st = AtomicSocketState::new();
        assert!(!st.transition(SocketState::Open, SocketState::Closed));
        assert!(st.transition(SocketState::Open, SocketState::Closing));
        assert!(!st.transition(SocketState::Open, SocketState::Closing));
        assert!(!st.transition(SocketState::Closing, SocketState::Open));
        assert!(st.transition(SocketState::Closing, SocketState::Closed));
        assert_eq!(st.load(), SocketState::Closed);
        assert!(!st.is_open());
    }

    #[test]
    fn test_single_winner() {
        let st = Arc::new(AtomicSocketState::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let st = Arc::clone(&st);
                thread::spawn(move || st.transition(SocketState::Open, SocketState::Closing))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_kind_classes() {
        assert!(SocketKind::UdpMulticast.is_datagram());
        assert!(SocketKind::TcpServer.is_stream());
        assert!(!SocketKind::TcpListen.is_stream());
        assert!(!SocketKind::TcpListen.is_datagram());
        assert_eq!(SocketKind::TcpClient.to_string(), "tcp-client");
    }
}
