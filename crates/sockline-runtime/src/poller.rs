//! Shared poller - one thread servicing many sockets
//!
//! The alternative to a thread per socket. Sockets register a [`PollTarget`]
//! keyed by descriptor; a single background thread runs while the registry is
//! non-empty and makes one non-blocking read or accept attempt per socket and
//! pass.
//!
//! # Backoff
//!
//! A pass that serviced at least one socket repeats right away (after a
//! yield). Each consecutive idle pass sleeps 1ms longer than the previous one,
//! up to `max_backoff`.
//!
//! # Registry
//!
//! Entries hold `Weak` references. An entry whose socket is gone is skipped
//! but stays until its descriptor is deregistered; sockets deregister
//! themselves when dropped.

use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sockline_core::constants::POLLER_MAX_BACKOFF_MS;
use sockline_core::{ErrorKind, SocketError, SocketResult};

use crate::socket::{lock, ComShared, ListenShared, Pollable, Step};

/// What the poller does with a registered descriptor
#[derive(Clone)]
pub(crate) enum PollTarget {
    /// Data socket: receive
    Readable(Weak<ComShared>),
    /// Listen socket: accept
    Acceptable(Weak<ListenShared>),
}

impl PollTarget {
    /// One attempt; `None` when the socket no longer exists
    ///
    /// An idle attempt consults the socket's watchdog.
    pub(crate) fn poll_step(&self) -> Option<Step> {
        match self {
            PollTarget::Readable(weak) => weak.upgrade().map(|s| Self::drive(&s)),
            PollTarget::Acceptable(weak) => weak.upgrade().map(|s| Self::drive(&s)),
        }
    }

    fn drive<T: Pollable>(target: &Arc<T>) -> Step {
        match target.step() {
            Step::Idle if !target.core().check_watchdog() => Step::Closed,
            step => step,
        }
    }
}

/// Poller counters
#[derive(Debug, Default)]
pub struct PollerStats {
    pub passes: AtomicU64,
    /// Passes that serviced at least one socket
    pub busy_passes: AtomicU64,
    pub threads_spawned: AtomicU64,
}

struct PollThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    targets: BTreeMap<RawFd, PollTarget>,
    thread: Option<PollThread>,
}

struct PollerInner {
    registry: Mutex<Registry>,
    max_backoff: Duration,
    stats: PollerStats,
}

/// Handle to a shared poller
///
/// Clones share the registry and thread.
#[derive(Clone)]
pub struct SocketPoller {
    inner: Arc<PollerInner>,
}

impl SocketPoller {
    pub fn new(max_backoff: Duration) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                registry: Mutex::new(Registry::default()),
                max_backoff,
                stats: PollerStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> &PollerStats {
        &self.inner.stats
    }

    /// Registered descriptors, live or not
    pub fn len(&self) -> usize {
        lock(&self.inner.registry).targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the background thread is running
    pub fn is_active(&self) -> bool {
        lock(&self.inner.registry).thread.is_some()
    }

    /// Add `target` under `fd`, starting the thread if this is the first entry
    pub(crate) fn register(&self, fd: RawFd, target: PollTarget) -> SocketResult<()> {
        let mut registry = lock(&self.inner.registry);
        registry.targets.insert(fd, target);
        if registry.thread.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let weak = Arc::downgrade(&self.inner);
        match thread::Builder::new()
            .name("sockline-poller".into())
            .spawn(move || poll_loop(weak, flag))
        {
            Ok(handle) => {
                registry.thread = Some(PollThread { running, handle });
                self.inner.stats.threads_spawned.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("poller thread started");
                Ok(())
            }
            Err(e) => {
                registry.targets.remove(&fd);
                Err(SocketError::new(
                    ErrorKind::HandleLimit,
                    format!("Unable to start poller thread: {}", e),
                ))
            }
        }
    }

    /// Remove `fd`; stops the thread once the registry is empty
    pub(crate) fn deregister(&self, fd: RawFd) {
        let stopped = {
            let mut registry = lock(&self.inner.registry);
            registry.targets.remove(&fd);
            if registry.targets.is_empty() {
                registry.thread.take()
            } else {
                None
            }
        };

        if let Some(PollThread { running, handle }) = stopped {
            running.store(false, Ordering::Release);
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("poller thread panicked");
            }
            tracing::debug!("poller thread stopped");
        }
    }

    /// Run one pass over every registered socket; true if any was busy
    pub fn poll_once(&self) -> bool {
        self.inner.poll_once()
    }
}

impl Default for SocketPoller {
    fn default() -> Self {
        Self::new(Duration::from_millis(POLLER_MAX_BACKOFF_MS))
    }
}

impl std::fmt::Debug for SocketPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPoller")
            .field("registered", &self.len())
            .field("active", &self.is_active())
            .finish()
    }
}

impl PollerInner {
    fn poll_once(&self) -> bool {
        let snapshot: Vec<PollTarget> = lock(&self.registry).targets.values().cloned().collect();

        let mut busy = false;
        for target in &snapshot {
            if let Some(Step::Busy) = target.poll_step() {
                busy = true;
            }
        }

        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        if busy {
            self.stats.busy_passes.fetch_add(1, Ordering::Relaxed);
        }
        busy
    }
}

fn poll_loop(inner: Weak<PollerInner>, running: Arc<AtomicBool>) {
    const STEP: Duration = Duration::from_millis(1);
    let mut backoff = Duration::ZERO;

    while running.load(Ordering::Acquire) {
        let Some(poller) = inner.upgrade() else {
            break;
        };
        let busy = poller.poll_once();
        let max_backoff = poller.max_backoff;
        drop(poller);

        if busy {
            backoff = Duration::ZERO;
            thread::yield_now();
        } else {
            backoff = (backoff + STEP).min(max_backoff);
            thread::sleep(backoff);
        }
    }
    tracing::trace!("poller thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_target() -> PollTarget {
        PollTarget::Readable(Weak::new())
    }

    #[test]
    fn test_one_thread_for_many_sockets() {
        let poller = SocketPoller::new(Duration::from_millis(5));
        assert!(!poller.is_active());

        for fd in 100..105 {
            poller.register(fd, dead_target()).unwrap();
        }
        assert!(poller.is_active());
        assert_eq!(poller.len(), 5);
        assert_eq!(poller.stats().threads_spawned.load(Ordering::Relaxed), 1);

        for fd in 100..104 {
            poller.deregister(fd);
            assert!(poller.is_active());
        }
        poller.deregister(104);
        assert!(!poller.is_active());
        assert!(poller.is_empty());
    }

    #[test]
    fn test_restart_after_empty() {
        let poller = SocketPoller::new(Duration::from_millis(5));
        poller.register(7, dead_target()).unwrap();
        poller.deregister(7);
        assert!(!poller.is_active());

        poller.register(8, PollTarget::Acceptable(Weak::new())).unwrap();
        assert!(poller.is_active());
        assert_eq!(poller.stats().threads_spawned.load(Ordering::Relaxed), 2);
        poller.deregister(8);
    }

    #[test]
    fn test_dead_entries_are_skipped_not_pruned() {
        let poller = SocketPoller::new(Duration::from_millis(5));
        poller.register(9, dead_target()).unwrap();
        assert!(!poller.poll_once());
        assert_eq!(poller.len(), 1);
        assert!(dead_target().poll_step().is_none());
        poller.deregister(9);
    }

    #[test]
    fn test_deregister_unknown_fd() {
        let poller = SocketPoller::default();
        poller.deregister(42);
        assert!(!poller.is_active());
    }
}
