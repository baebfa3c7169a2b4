//! Runtime - the services a socket runs on
//!
//! A `Runtime` bundles the configuration, the scheduler that delivers events
//! and the shared poller. Every socket keeps the runtime it was created with.
//! Tests and embedders create their own; the top-level factories use the
//! process-wide [`Runtime::global`].

use std::sync::{Arc, OnceLock};

use sockline_core::{ConfigError, Endpoint, SocketResult};

use crate::config::NetConfig;
use crate::poller::SocketPoller;
use crate::scheduler::Scheduler;
use crate::socket::{self, ComSocket, ListenSocket};

static GLOBAL_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Configuration plus scheduler and poller
///
/// Cheap to clone; clones share the same services.
#[derive(Clone, Debug)]
pub struct Runtime {
    scheduler: Scheduler,
    poller: SocketPoller,
    config: Arc<NetConfig>,
}

impl Runtime {
    /// Fresh scheduler and poller sized from `config`
    ///
    /// The scheduler is not started; until it is, events are delivered on
    /// the I/O thread that observed them.
    pub fn new(config: NetConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            scheduler: Scheduler::new(config.scheduler_idle),
            poller: SocketPoller::new(config.poller_max_backoff),
            config: Arc::new(config),
        })
    }

    /// The process-wide runtime, configured from the environment on first use
    ///
    /// An invalid environment falls back to the library defaults.
    pub fn global() -> &'static Runtime {
        GLOBAL_RUNTIME.get_or_init(|| {
            let config = NetConfig::from_env();
            config.log();
            Runtime::new(config).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "invalid socket configuration, using defaults");
                Runtime {
                    scheduler: Scheduler::default(),
                    poller: SocketPoller::default(),
                    config: Arc::new(NetConfig::new()),
                }
            })
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn poller(&self) -> &SocketPoller {
        &self.poller
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn create_udp_unicast(&self, bind: Endpoint) -> SocketResult<ComSocket> {
        socket::create_udp_unicast(self, bind)
    }

    pub fn create_udp_multicast(
        &self,
        interface: Endpoint,
        group: Endpoint,
    ) -> SocketResult<ComSocket> {
        socket::create_udp_multicast(self, interface, group)
    }

    pub fn create_tcp_listen(&self, bind: Endpoint) -> SocketResult<ListenSocket> {
        socket::create_tcp_listen(self, bind)
    }

    pub fn create_tcp_client(&self, bind: Endpoint, remote: Endpoint) -> SocketResult<ComSocket> {
        socket::create_tcp_client(self, bind, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoStrategy;

    #[test]
    fn test_invalid_config_rejected() {
        let config = NetConfig::new().recv_chunk(0);
        assert!(Runtime::new(config).is_err());
    }

    #[test]
    fn test_runtimes_are_isolated() {
        let a = Runtime::new(NetConfig::new()).unwrap();
        let b = Runtime::new(NetConfig::new()).unwrap();
        a.scheduler().queue(|| {});
        assert_eq!(a.scheduler().pending(), 1);
        assert_eq!(b.scheduler().pending(), 0);
        // clones share
        assert_eq!(a.clone().scheduler().pending(), 1);
    }

    #[test]
    fn test_global_is_shared() {
        let first = Runtime::global() as *const Runtime;
        let second = Runtime::global() as *const Runtime;
        assert_eq!(first, second);
    }

    #[test]
    fn test_poller_strategy_registers() {
        let rt = Runtime::new(NetConfig::new().io_strategy(IoStrategy::SharedPoller)).unwrap();
        let sock = rt
            .create_udp_unicast(Endpoint::new("127.0.0.1", 0).unwrap())
            .unwrap();
        assert!(rt.poller().is_active());
        assert_eq!(rt.poller().len(), 1);
        drop(sock);
        assert!(!rt.poller().is_active());
        assert!(rt.poller().is_empty());
    }
}
