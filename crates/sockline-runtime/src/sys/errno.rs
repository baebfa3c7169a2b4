//! OS error classification
//!
//! The same errno means different things depending on which call produced
//! it, so classification is keyed by the failing operation.

use nix::errno::Errno;

use sockline_core::{ErrorKind, SocketError};

use super::describe;

/// The call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Open,
    /// Non-blocking mode, socket options, group membership
    Configure,
    /// `ephemeral` is set when port 0 was requested
    Bind { ephemeral: bool },
    Listen,
    Connect,
    Accept,
    Read,
    Send,
    Probe,
}

impl Op {
    fn verb(&self) -> &'static str {
        match self {
            Op::Open => "Unable to create socket",
            Op::Configure => "Unable to configure socket",
            Op::Bind { .. } => "Unable to bind socket",
            Op::Listen => "Unable to listen on socket",
            Op::Connect => "Unable to connect socket",
            Op::Accept => "Could not accept connection",
            Op::Read => "Could not read socket",
            Op::Send => "Could not send on socket",
            Op::Probe => "Unable to poll connection",
        }
    }
}

/// What to do with a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing happened yet; try again later (or drop, for sends)
    Retry,
    /// Transient condition, continue with the next attempt immediately
    Skip,
    /// Fatal for the socket
    Fail(ErrorKind),
}

#[inline]
fn would_block(errno: Errno) -> bool {
    errno == Errno::EAGAIN || errno == Errno::EWOULDBLOCK
}

pub fn classify(op: Op, errno: Errno) -> Disposition {
    use Disposition::*;
    use ErrorKind::*;

    match op {
        Op::Open => match errno {
            Errno::EACCES => Fail(Permission),
            Errno::EMFILE | Errno::ENFILE => Fail(HandleLimit),
            _ => Fail(Generic),
        },
        Op::Configure => Fail(Configuration),
        Op::Bind { ephemeral } => match errno {
            Errno::EACCES => Fail(Permission),
            Errno::EADDRINUSE if ephemeral => Fail(HandleLimit),
            Errno::EADDRINUSE => Fail(Bind),
            _ => Fail(Generic),
        },
        Op::Listen => match errno {
            Errno::EADDRINUSE => Fail(Bind),
            _ => Fail(Listen),
        },
        Op::Connect => match errno {
            e if would_block(e) => Retry,
            Errno::EINPROGRESS => Retry,
            Errno::EINTR | Errno::ENETUNREACH => Fail(BrokenPipe),
            _ => Fail(Generic),
        },
        Op::Accept => match errno {
            e if would_block(e) => Retry,
            Errno::ECONNABORTED => Skip,
            Errno::ENOBUFS | Errno::ENOMEM => Fail(NoMemory),
            Errno::EMFILE | Errno::ENFILE => Fail(HandleLimit),
            Errno::EINTR => Fail(BrokenPipe),
            _ => Fail(Generic),
        },
        Op::Read => match errno {
            e if would_block(e) => Retry,
            Errno::ENOMEM => Fail(NoMemory),
            Errno::EINTR | Errno::ECONNREFUSED | Errno::ENOTCONN | Errno::ECONNRESET => {
                Fail(BrokenPipe)
            }
            _ => Fail(Generic),
        },
        Op::Send => match errno {
            e if would_block(e) => Retry,
            Errno::EACCES => Fail(Permission),
            Errno::ENOBUFS | Errno::ENOMEM | Errno::EMSGSIZE => Fail(NoMemory),
            Errno::ECONNRESET | Errno::ENOTCONN | Errno::EPIPE => Fail(BrokenPipe),
            Errno::EDESTADDRREQ | Errno::EISCONN => Fail(Configuration),
            _ => Fail(Generic),
        },
        Op::Probe => match errno {
            Errno::ENOMEM => Fail(NoMemory),
            _ => Fail(Generic),
        },
    }
}

/// Build the error reported for a fatal `errno` of `op`
pub fn to_error(op: Op, kind: ErrorKind, errno: Errno) -> SocketError {
    let detail = match (op, errno) {
        (Op::Bind { ephemeral: true }, Errno::EADDRINUSE) => "no free ephemeral ports".to_string(),
        _ => describe(errno),
    };
    SocketError::new(kind, format!("{}: {}", op.verb(), detail)).with_os_error(errno as i32)
}

/// Classify a construction-time failure; anything not fatal is still an error here
pub fn setup_error(op: Op, errno: Errno) -> SocketError {
    let kind = match classify(op, errno) {
        Disposition::Fail(kind) => kind,
        Disposition::Retry | Disposition::Skip => ErrorKind::Generic,
    };
    to_error(op, kind, errno)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Disposition::*;

    #[test]
    fn test_open_errors() {
        assert_eq!(classify(Op::Open, Errno::EACCES), Fail(ErrorKind::Permission));
        assert_eq!(classify(Op::Open, Errno::EMFILE), Fail(ErrorKind::HandleLimit));
        assert_eq!(classify(Op::Open, Errno::ENFILE), Fail(ErrorKind::HandleLimit));
        assert_eq!(classify(Op::Open, Errno::EINVAL), Fail(ErrorKind::Generic));
    }

    #[test]
    fn test_bind_address_in_use() {
        assert_eq!(
            classify(Op::Bind { ephemeral: true }, Errno::EADDRINUSE),
            Fail(ErrorKind::HandleLimit)
        );
        assert_eq!(
            classify(Op::Bind { ephemeral: false }, Errno::EADDRINUSE),
            Fail(ErrorKind::Bind)
        );
        assert_eq!(
            classify(Op::Bind { ephemeral: false }, Errno::EACCES),
            Fail(ErrorKind::Permission)
        );
    }

    #[test]
    fn test_connect_in_progress_is_expected() {
        assert_eq!(classify(Op::Connect, Errno::EINPROGRESS), Retry);
        assert_eq!(classify(Op::Connect, Errno::EAGAIN), Retry);
        assert_eq!(classify(Op::Connect, Errno::ENETUNREACH), Fail(ErrorKind::BrokenPipe));
        assert_eq!(classify(Op::Connect, Errno::ECONNREFUSED), Fail(ErrorKind::Generic));
    }

    #[test]
    fn test_accept_errors() {
        assert_eq!(classify(Op::Accept, Errno::EWOULDBLOCK), Retry);
        assert_eq!(classify(Op::Accept, Errno::ECONNABORTED), Skip);
        assert_eq!(classify(Op::Accept, Errno::ENOBUFS), Fail(ErrorKind::NoMemory));
        assert_eq!(classify(Op::Accept, Errno::EMFILE), Fail(ErrorKind::HandleLimit));
    }

    #[test]
    fn test_send_errors() {
        assert_eq!(classify(Op::Send, Errno::EAGAIN), Retry);
        assert_eq!(classify(Op::Send, Errno::EACCES), Fail(ErrorKind::Permission));
        assert_eq!(classify(Op::Send, Errno::EMSGSIZE), Fail(ErrorKind::NoMemory));
        assert_eq!(classify(Op::Send, Errno::EPIPE), Fail(ErrorKind::BrokenPipe));
        assert_eq!(classify(Op::Send, Errno::ECONNRESET), Fail(ErrorKind::BrokenPipe));
        assert_eq!(classify(Op::Send, Errno::EDESTADDRREQ), Fail(ErrorKind::Configuration));
        assert_eq!(classify(Op::Send, Errno::EBADF), Fail(ErrorKind::Generic));
    }

    #[test]
    fn test_read_errors() {
        assert_eq!(classify(Op::Read, Errno::EAGAIN), Retry);
        assert_eq!(classify(Op::Read, Errno::ENOTCONN), Fail(ErrorKind::BrokenPipe));
        assert_eq!(classify(Op::Read, Errno::ENOMEM), Fail(ErrorKind::NoMemory));
    }

    #[test]
    fn test_error_message_and_code() {
        let e = setup_error(Op::Bind { ephemeral: true }, Errno::EADDRINUSE);
        assert_eq!(e.kind(), ErrorKind::HandleLimit);
        assert_eq!(e.os_error(), Some(Errno::EADDRINUSE as i32));
        assert!(e.message().contains("ephemeral"));

        let e = setup_error(Op::Connect, Errno::EINPROGRESS);
        assert_eq!(e.kind(), ErrorKind::Generic);
    }
}
