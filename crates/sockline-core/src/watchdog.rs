//! Inactivity watchdog
//!
//! A watchdog is armed with a timeout and reset on every successful I/O. The
//! owner polls [`Watchdog::check`]; once the timeout has elapsed since the
//! last reset the callback fires, exactly once per expiry window.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Invoked when the watchdog expires
pub type TimeoutCallback = Box<dyn FnMut() + Send>;

pub struct Watchdog {
    timeout: Duration,
    last_reset: Instant,
    tripped: bool,
    on_timeout: Option<TimeoutCallback>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// A disabled watchdog (zero timeout)
    pub fn new() -> Self {
        Self::with_timeout(Duration::ZERO, None)
    }

    pub fn with_timeout(timeout: Duration, on_timeout: Option<TimeoutCallback>) -> Self {
        Self {
            timeout,
            last_reset: Instant::now(),
            tripped: false,
            on_timeout,
        }
    }

    /// Change the timeout; zero disables the watchdog
    ///
    /// Does not reset the inactivity clock.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_callback(&mut self, on_timeout: Option<TimeoutCallback>) {
        self.on_timeout = on_timeout;
    }

    /// Restart the inactivity clock and re-arm the callback
    pub fn reset(&mut self) {
        self.last_reset = Instant::now();
        self.tripped = false;
    }

    /// Returns `false` once the timeout has elapsed since the last reset
    ///
    /// The first failing check of an expiry window runs the callback. A panic
    /// inside the callback is logged and swallowed.
    pub fn check(&mut self) -> bool {
        if self.timeout.is_zero() {
            return true;
        }
        if self.last_reset.elapsed() < self.timeout {
            return true;
        }
        if !self.tripped {
            self.tripped = true;
            if let Some(cb) = self.on_timeout.as_mut() {
                if catch_unwind(AssertUnwindSafe(cb)).is_err() {
                    tracing::warn!("watchdog timeout callback panicked");
                }
            }
        }
        false
    }

    /// True after the callback fired and before the next reset
    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("timeout", &self.timeout)
            .field("elapsed", &self.last_reset.elapsed())
            .field("tripped", &self.tripped)
            .field("has_callback", &self.on_timeout.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn counting(count: &Arc<AtomicUsize>) -> Option<TimeoutCallback> {
        let count = Arc::clone(count);
        Some(Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_disabled_never_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut w = Watchdog::with_timeout(Duration::ZERO, counting(&count));
        thread::sleep(Duration::from_millis(5));
        assert!(w.check());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fires_once_per_window() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut w = Watchdog::with_timeout(Duration::from_millis(10), counting(&count));
        assert!(w.check());

        thread::sleep(Duration::from_millis(20));
        assert!(!w.check());
        assert!(!w.check());
        assert!(w.is_tripped());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        w.reset();
        assert!(w.check());
        thread::sleep(Duration::from_millis(20));
        assert!(!w.check());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fails_without_callback() {
        let mut w = Watchdog::with_timeout(Duration::from_millis(1), None);
        thread::sleep(Duration::from_millis(5));
        assert!(!w.check());
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let mut w = Watchdog::with_timeout(
            Duration::from_millis(1),
            Some(Box::new(|| panic!("callback failure"))),
        );
        thread::sleep(Duration::from_millis(5));
        assert!(!w.check());
        assert!(w.is_tripped());
    }

    #[test]
    fn test_set_timeout_keeps_clock() {
        let mut w = Watchdog::new();
        thread::sleep(Duration::from_millis(15));
        w.set_timeout(Duration::from_millis(10));
        assert!(!w.check());
    }
}
