//! Error types for the socket engine

use core::fmt;

use crate::endpoint::Family;

/// Result type for socket operations
pub type SocketResult<T> = Result<T, SocketError>;

/// Uniform error taxonomy shared by every socket kind and OS family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Other unspecified error
    Generic,

    /// The process lacks permission for the operation
    Permission,

    /// Failed to configure options on the socket
    Configuration,

    /// Address protected or already in use
    Bind,

    /// Watchdog or liveness probe expired
    Timeout,

    /// Remote closed the connection, or the descriptor was invalidated
    BrokenPipe,

    /// Kernel or process ran out of buffers/memory
    NoMemory,

    /// Error while listening for connections
    Listen,

    /// Descriptor table or ephemeral port range exhausted
    HandleLimit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Generic => "generic",
            ErrorKind::Permission => "permission",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Bind => "bind",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BrokenPipe => "broken pipe",
            ErrorKind::NoMemory => "no memory",
            ErrorKind::Listen => "listen",
            ErrorKind::HandleLimit => "handle limit",
        };
        f.write_str(name)
    }
}

/// A classified socket failure
///
/// Raised synchronously by the factories, and delivered through the error
/// callback for everything that happens after construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct SocketError {
    kind: ErrorKind,
    message: String,
    os_error: Option<i32>,
}

impl SocketError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            os_error: None,
        }
    }

    /// Attach the raw OS error code that caused this failure
    pub fn with_os_error(mut self, errno: i32) -> Self {
        self.os_error = Some(errno);
        self
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn os_error(&self) -> Option<i32> {
        self.os_error
    }
}

/// Errors from building or converting an `Endpoint`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// The string or native structure does not describe an IPv4/IPv6 address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A native structure of the other family was requested
    #[error("endpoint is not an {expected} endpoint")]
    WrongFamily { expected: Family },
}

impl From<EndpointError> for SocketError {
    fn from(e: EndpointError) -> Self {
        SocketError::new(ErrorKind::Configuration, e.to_string())
    }
}

/// Errors from driving the task scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `run()` or `spawn()` while the scheduler is running or draining
    #[error("scheduler is not ready to be started")]
    NotReady,

    /// The scheduler thread could not be created
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SocketError::new(ErrorKind::BrokenPipe, "socket was closed");
        assert_eq!(e.to_string(), "broken pipe error: socket was closed");
        assert_eq!(e.kind(), ErrorKind::BrokenPipe);
        assert_eq!(e.os_error(), None);
    }

    #[test]
    fn test_os_error_attached() {
        let e = SocketError::new(ErrorKind::Bind, "address in use").with_os_error(98);
        assert_eq!(e.os_error(), Some(98));
        assert_eq!(e.message(), "address in use");
    }

    #[test]
    fn test_endpoint_error_conversion() {
        let e: SocketError = EndpointError::WrongFamily { expected: Family::Ipv6 }.into();
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert!(e.message().contains("IPv6"));
    }
}
