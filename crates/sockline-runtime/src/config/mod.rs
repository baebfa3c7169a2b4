//! Socket engine configuration
//!
//! Provides compiled defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls on a `NetConfig`
//! 2. Environment variables (`from_env()` only)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use sockline_runtime::config::{IoStrategy, NetConfig};
//!
//! let config = NetConfig::from_env()
//!     .io_strategy(IoStrategy::SharedPoller)
//!     .default_timeout(Duration::from_secs(30));
//! ```

pub mod defaults;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sockline_core::env::{env_get, env_get_millis};
use sockline_core::ConfigError;

/// Who drives reads and accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStrategy {
    /// One dedicated I/O thread per socket
    ThreadPerSocket,
    /// One process-wide polling thread for all sockets
    SharedPoller,
}

impl FromStr for IoStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thread" | "thread-per-socket" => Ok(IoStrategy::ThreadPerSocket),
            "poller" | "shared-poller" => Ok(IoStrategy::SharedPoller),
            _ => Err(ConfigError::InvalidValue(
                "io strategy must be `thread` or `poller`",
            )),
        }
    }
}

impl fmt::Display for IoStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoStrategy::ThreadPerSocket => f.write_str("thread"),
            IoStrategy::SharedPoller => f.write_str("poller"),
        }
    }
}

/// Runtime configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Thread-per-socket or shared poller
    pub io_strategy: IoStrategy,
    /// SO_SNDBUF / SO_RCVBUF in bytes
    pub socket_buffer: usize,
    /// Bytes read per receive call
    pub recv_chunk: usize,
    /// Listen backlog
    pub listen_backlog: i32,
    /// Readiness wait of a per-socket I/O thread
    pub readiness_poll: Duration,
    /// Upper bound of the `is_open` probe
    pub liveness_probe: Duration,
    /// Inactivity timeout applied to new sockets (zero disables)
    pub default_timeout: Duration,
    /// Longest sleep of an idle shared poller
    pub poller_max_backoff: Duration,
    /// Longest wait of an idle scheduler
    pub scheduler_idle: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NetConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SOCKLINE_IO_STRATEGY` - `thread` or `poller`
    /// - `SOCKLINE_SOCKET_BUFFER` - Send/receive buffer size in bytes
    /// - `SOCKLINE_RECV_CHUNK` - Bytes per receive call
    /// - `SOCKLINE_LISTEN_BACKLOG` - Listen backlog
    /// - `SOCKLINE_READINESS_POLL_MS` - I/O thread readiness wait
    /// - `SOCKLINE_LIVENESS_PROBE_MS` - `is_open` probe bound
    /// - `SOCKLINE_DEFAULT_TIMEOUT_MS` - Inactivity timeout for new sockets
    /// - `SOCKLINE_POLLER_MAX_BACKOFF_MS` - Poller idle sleep cap
    /// - `SOCKLINE_SCHEDULER_IDLE_MS` - Scheduler idle wait
    pub fn from_env() -> Self {
        Self {
            io_strategy: env_get("SOCKLINE_IO_STRATEGY", defaults::IO_STRATEGY),
            socket_buffer: env_get("SOCKLINE_SOCKET_BUFFER", defaults::SOCKET_BUFFER),
            recv_chunk: env_get("SOCKLINE_RECV_CHUNK", defaults::RECV_CHUNK),
            listen_backlog: env_get("SOCKLINE_LISTEN_BACKLOG", defaults::LISTEN_BACKLOG),
            readiness_poll: env_get_millis(
                "SOCKLINE_READINESS_POLL_MS",
                defaults::READINESS_POLL_MS,
            ),
            liveness_probe: env_get_millis(
                "SOCKLINE_LIVENESS_PROBE_MS",
                defaults::LIVENESS_PROBE_MS,
            ),
            default_timeout: env_get_millis(
                "SOCKLINE_DEFAULT_TIMEOUT_MS",
                defaults::DEFAULT_TIMEOUT_MS,
            ),
            poller_max_backoff: env_get_millis(
                "SOCKLINE_POLLER_MAX_BACKOFF_MS",
                defaults::POLLER_MAX_BACKOFF_MS,
            ),
            scheduler_idle: env_get_millis(
                "SOCKLINE_SCHEDULER_IDLE_MS",
                defaults::SCHEDULER_IDLE_MS,
            ),
        }
    }

    /// Create config with library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            io_strategy: defaults::IO_STRATEGY,
            socket_buffer: defaults::SOCKET_BUFFER,
            recv_chunk: defaults::RECV_CHUNK,
            listen_backlog: defaults::LISTEN_BACKLOG,
            readiness_poll: Duration::from_millis(defaults::READINESS_POLL_MS),
            liveness_probe: Duration::from_millis(defaults::LIVENESS_PROBE_MS),
            default_timeout: Duration::from_millis(defaults::DEFAULT_TIMEOUT_MS),
            poller_max_backoff: Duration::from_millis(defaults::POLLER_MAX_BACKOFF_MS),
            scheduler_idle: Duration::from_millis(defaults::SCHEDULER_IDLE_MS),
        }
    }

    // Builder methods

    pub fn io_strategy(mut self, strategy: IoStrategy) -> Self {
        self.io_strategy = strategy;
        self
    }

    pub fn socket_buffer(mut self, bytes: usize) -> Self {
        self.socket_buffer = bytes;
        self
    }

    pub fn recv_chunk(mut self, bytes: usize) -> Self {
        self.recv_chunk = bytes;
        self
    }

    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    pub fn readiness_poll(mut self, d: Duration) -> Self {
        self.readiness_poll = d;
        self
    }

    pub fn liveness_probe(mut self, d: Duration) -> Self {
        self.liveness_probe = d;
        self
    }

    pub fn default_timeout(mut self, d: Duration) -> Self {
        self.default_timeout = d;
        self
    }

    pub fn poller_max_backoff(mut self, d: Duration) -> Self {
        self.poller_max_backoff = d;
        self
    }

    pub fn scheduler_idle(mut self, d: Duration) -> Self {
        self.scheduler_idle = d;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_buffer == 0 {
            return Err(ConfigError::InvalidValue("socket_buffer must be > 0"));
        }
        if self.socket_buffer > i32::MAX as usize {
            return Err(ConfigError::InvalidValue("socket_buffer must fit in an int"));
        }
        if self.recv_chunk == 0 {
            return Err(ConfigError::InvalidValue("recv_chunk must be > 0"));
        }
        if self.listen_backlog < 1 {
            return Err(ConfigError::InvalidValue("listen_backlog must be >= 1"));
        }
        if self.readiness_poll.is_zero() {
            return Err(ConfigError::InvalidValue("readiness_poll must be > 0"));
        }
        if self.liveness_probe.is_zero() {
            return Err(ConfigError::InvalidValue("liveness_probe must be > 0"));
        }
        if self.poller_max_backoff.is_zero() {
            return Err(ConfigError::InvalidValue("poller_max_backoff must be > 0"));
        }
        if self.scheduler_idle.is_zero() {
            return Err(ConfigError::InvalidValue("scheduler_idle must be > 0"));
        }
        Ok(())
    }

    /// Emit the configuration at debug level
    pub fn log(&self) {
        tracing::debug!(
            io_strategy = %self.io_strategy,
            socket_buffer = self.socket_buffer,
            recv_chunk = self.recv_chunk,
            listen_backlog = self.listen_backlog,
            readiness_poll = ?self.readiness_poll,
            liveness_probe = ?self.liveness_probe,
            default_timeout = ?self.default_timeout,
            poller_max_backoff = ?self.poller_max_backoff,
            scheduler_idle = ?self.scheduler_idle,
            "sockline configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NetConfig::new();
        assert_eq!(config.io_strategy, IoStrategy::ThreadPerSocket);
        assert_eq!(config.socket_buffer, 4096);
        assert_eq!(config.listen_backlog, 1);
        assert!(config.default_timeout.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = NetConfig::new()
            .io_strategy(IoStrategy::SharedPoller)
            .recv_chunk(1500)
            .default_timeout(Duration::from_secs(3));

        assert_eq!(config.io_strategy, IoStrategy::SharedPoller);
        assert_eq!(config.recv_chunk, 1500);
        assert_eq!(config.default_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_validation() {
        assert!(NetConfig::new().recv_chunk(0).validate().is_err());
        assert!(NetConfig::new().listen_backlog(0).validate().is_err());
        assert!(NetConfig::new()
            .readiness_poll(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_io_strategy_parse() {
        assert_eq!("poller".parse::<IoStrategy>(), Ok(IoStrategy::SharedPoller));
        assert_eq!("THREAD".parse::<IoStrategy>(), Ok(IoStrategy::ThreadPerSocket));
        assert!("epoll".parse::<IoStrategy>().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("SOCKLINE_RECV_CHUNK", "9000");
        let config = NetConfig::from_env();
        std::env::remove_var("SOCKLINE_RECV_CHUNK");
        assert_eq!(config.recv_chunk, 9000);
    }
}
