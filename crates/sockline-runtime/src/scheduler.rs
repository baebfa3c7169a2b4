//! Task scheduler - serializes event delivery to user code
//!
//! Every packet, accepted connection and socket error is handed to user
//! callbacks through a scheduler, so callbacks never run concurrently with
//! (or reentrant into) the I/O thread that observed the event.
//!
//! ```text
//!   Ready ──run()/spawn()──▶ Running ──stop()──▶ Stopping ──queue empty──▶ Ready
//! ```
//!
//! A pass (`think()`) takes the whole task list under the lock, runs every
//! due task outside the lock, then merges survivors back in front of anything
//! queued meanwhile. One-shot tasks run once. Periodic tasks run every
//! `period` until they return `false`; while stopping they are discarded.

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sockline_core::constants::SCHEDULER_IDLE_MS;
use sockline_core::SchedulerError;

type OneShot = Box<dyn FnOnce() + Send>;
type Periodic = Box<dyn FnMut() -> bool + Send>;

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    /// No loop is running; `queue` only stores
    Ready = 0,
    Running = 1,
    /// Draining the queue before going back to `Ready`
    Stopping = 2,
}

impl From<u8> for SchedulerState {
    fn from(v: u8) -> Self {
        match v {
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            _ => SchedulerState::Ready,
        }
    }
}

enum Body {
    Once(OneShot),
    Every { task: Periodic, period: Duration },
}

struct Task {
    body: Body,
    next_exec: Instant,
}

/// Scheduler counters
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub passes: AtomicU64,
    pub tasks_run: AtomicU64,
    pub panics: AtomicU64,
}

struct Shared {
    state: AtomicU8,
    tasks: Mutex<Vec<Task>>,
    wakeup: Condvar,
    idle_wait: Duration,
    stats: SchedulerStats,
}

/// Handle to a task queue; clones share the same queue
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(SCHEDULER_IDLE_MS))
    }
}

impl Scheduler {
    /// Create a stopped scheduler
    ///
    /// `idle_wait` bounds how long an idle loop blocks before re-checking.
    pub fn new(idle_wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(SchedulerState::Ready as u8),
                tasks: Mutex::new(Vec::new()),
                wakeup: Condvar::new(),
                idle_wait,
                stats: SchedulerStats::default(),
            }),
        }
    }

    #[inline]
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from(self.shared.state.load(Ordering::Acquire))
    }

    /// True from `run()`/`spawn()` until the loop has drained after `stop()`
    #[inline]
    pub fn is_started(&self) -> bool {
        self.state() != SchedulerState::Ready
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.shared.stats
    }

    /// Number of queued tasks (one-shot and periodic)
    pub fn pending(&self) -> usize {
        lock(&self.shared.tasks).len()
    }

    fn push(&self, task: Task) {
        lock(&self.shared.tasks).push(task);
        self.shared.wakeup.notify_one();
    }

    /// Run `task` once on the next pass
    pub fn queue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Task {
            body: Body::Once(Box::new(task)),
            next_exec: Instant::now(),
        });
    }

    /// Run `task` on the next pass and then every `period` while it returns `true`
    ///
    /// A zero period runs the task on every pass.
    pub fn queue_every<F>(&self, period: Duration, task: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.push(Task {
            body: Body::Every {
                task: Box::new(task),
                period,
            },
            next_exec: Instant::now(),
        });
    }

    /// Hand an event to user code
    ///
    /// Queued while the loop is running or draining; otherwise invoked right
    /// here on the calling thread.
    pub fn deliver<F>(&self, event: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // the loop only goes back to Ready under this lock with an empty queue
        let mut tasks = lock(&self.shared.tasks);
        if self.is_started() {
            tasks.push(Task {
                body: Body::Once(Box::new(event)),
                next_exec: Instant::now(),
            });
            drop(tasks);
            self.shared.wakeup.notify_one();
        } else {
            drop(tasks);
            self.run_contained(event);
        }
    }

    fn run_contained<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.shared.stats.tasks_run.fetch_add(1, Ordering::Relaxed);
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(r) => Some(r),
            Err(_) => {
                self.shared.stats.panics.fetch_add(1, Ordering::Relaxed);
                tracing::error!("scheduled task panicked");
                None
            }
        }
    }

    /// Execute one pass over the queue
    ///
    /// Returns the earliest time a remaining task becomes due, or `None` if
    /// the queue is empty.
    pub fn think(&self) -> Option<Instant> {
        self.shared.stats.passes.fetch_add(1, Ordering::Relaxed);
        let batch = mem::take(&mut *lock(&self.shared.tasks));
        let stopping = self.state() == SchedulerState::Stopping;
        let now = Instant::now();

        let mut survivors = Vec::with_capacity(batch.len());
        for task in batch {
            let periodic = matches!(task.body, Body::Every { .. });
            if periodic && stopping {
                continue;
            }
            if task.next_exec > now {
                survivors.push(task);
                continue;
            }
            match task.body {
                Body::Once(f) => {
                    self.run_contained(f);
                }
                Body::Every {
                    task: mut f,
                    period,
                } => {
                    // a panicking periodic task is cancelled
                    if !self.run_contained(&mut f).unwrap_or(false) {
                        continue;
                    }
                    match Instant::now().checked_add(period) {
                        Some(next_exec) => survivors.push(Task {
                            body: Body::Every { task: f, period },
                            next_exec,
                        }),
                        None => tracing::debug!(?period, "periodic task never due again, dropped"),
                    }
                }
            }
        }

        let mut tasks = lock(&self.shared.tasks);
        let queued_meanwhile = mem::replace(&mut *tasks, survivors);
        tasks.extend(queued_meanwhile);
        tasks.iter().map(|t| t.next_exec).min()
    }

    /// Run the loop on the current thread until [`stop`](Self::stop) drains it
    pub fn run(&self) -> Result<(), SchedulerError> {
        self.begin()?;
        self.run_loop();
        Ok(())
    }

    /// Run the loop on a new thread
    pub fn spawn(&self) -> Result<SchedulerThread, SchedulerError> {
        self.begin()?;
        let scheduler = self.clone();
        let handle = thread::Builder::new()
            .name("sockline-scheduler".into())
            .spawn(move || scheduler.run_loop())
            .map_err(|e| {
                self.shared
                    .state
                    .store(SchedulerState::Ready as u8, Ordering::Release);
                SchedulerError::Spawn(e)
            })?;
        Ok(SchedulerThread {
            scheduler: self.clone(),
            handle: Some(handle),
        })
    }

    fn begin(&self) -> Result<(), SchedulerError> {
        self.shared
            .state
            .compare_exchange(
                SchedulerState::Ready as u8,
                SchedulerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(drop)
            .map_err(|_| SchedulerError::NotReady)
    }

    /// Ask the loop to finish the queued one-shot tasks and exit
    pub fn stop(&self) {
        if self
            .shared
            .state
            .compare_exchange(
                SchedulerState::Running as u8,
                SchedulerState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let _guard = lock(&self.shared.tasks);
            self.shared.wakeup.notify_all();
        }
    }

    fn run_loop(&self) {
        tracing::debug!("scheduler started");

        loop {
            let next = self.think();

            let tasks = lock(&self.shared.tasks);
            let now = Instant::now();
            if self.state() == SchedulerState::Stopping && tasks.is_empty() {
                self.shared
                    .state
                    .store(SchedulerState::Ready as u8, Ordering::Release);
                break;
            }
            if tasks.iter().any(|t| t.next_exec <= now) {
                drop(tasks);
                thread::yield_now();
                continue;
            }
            let wait = next
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(self.shared.idle_wait)
                .min(self.shared.idle_wait);
            let _ = self
                .shared
                .wakeup
                .wait_timeout(tasks, wait)
                .unwrap_or_else(PoisonError::into_inner);
        }

        tracing::debug!("scheduler stopped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owner of a spawned scheduler loop
///
/// Dropping it stops and joins the loop.
pub struct SchedulerThread {
    scheduler: Scheduler,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerThread {
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stop the loop and wait for it to drain
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.scheduler.stop();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn scheduler() -> Scheduler {
        Scheduler::new(Duration::from_millis(5))
    }

    #[test]
    fn test_one_shot_runs_once_after_start() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        s.queue(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let worker = s.spawn().unwrap();
        thread::sleep(Duration::from_millis(50));
        worker.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(s.state(), SchedulerState::Ready);
    }

    #[test]
    fn test_periodic_until_false() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        s.queue_every(Duration::ZERO, move || c.fetch_add(1, Ordering::SeqCst) + 1 < 3);

        for _ in 0..10 {
            s.think();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn test_periodic_respects_period() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        s.queue_every(Duration::from_secs(60), move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        });

        let first = s.think();
        s.think();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let next = first.unwrap();
        assert!(next > Instant::now() + Duration::from_secs(59));
    }

    #[test]
    fn test_enqueue_order_within_pass() {
        let s = scheduler();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            s.queue(move || tx.send(i).unwrap());
        }
        assert_eq!(s.think(), None);
        let seen: Vec<i32> = rx.try_iter().collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_task_queued_during_pass_runs_next_pass() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let inner = s.clone();
        let c = Arc::clone(&count);
        s.queue(move || {
            inner.queue(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });
        s.think();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        s.think();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_task_is_contained() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        s.queue(|| panic!("task failure"));
        s.queue(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        s.think();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(s.stats().panics.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deliver_runs_inline_when_stopped() {
        let s = scheduler();
        let (tx, rx) = mpsc::channel();
        s.deliver(move || tx.send(thread::current().id()).unwrap());
        assert_eq!(rx.try_recv().unwrap(), thread::current().id());
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn test_deliver_goes_through_loop_when_started() {
        let s = scheduler();
        let worker = s.spawn().unwrap();
        let (tx, rx) = mpsc::channel();
        s.deliver(move || tx.send(thread::current().name().map(String::from)).unwrap());
        let name = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(name.as_deref(), Some("sockline-scheduler"));
        worker.shutdown();
    }

    #[test]
    fn test_deliver_while_draining_keeps_order() {
        let s = scheduler();
        let worker = s.spawn().unwrap();

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (parked_tx, parked_rx) = mpsc::channel::<()>();
        s.queue(move || {
            let _ = parked_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        });
        parked_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let record = |n: u32| {
            let tx = tx.clone();
            move || {
                let _ = tx.send((n, thread::current().name().map(String::from)));
            }
        };
        s.deliver(record(1));
        s.stop();
        assert_eq!(s.state(), SchedulerState::Stopping);
        assert!(s.is_started());
        s.deliver(record(2));
        assert!(rx.try_recv().is_err());

        release_tx.send(()).unwrap();
        let loop_name = Some(String::from("sockline-scheduler"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), (1, loop_name.clone()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), (2, loop_name));
        worker.shutdown();
        assert_eq!(s.state(), SchedulerState::Ready);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn test_unbounded_period_runs_once() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        s.queue_every(Duration::MAX, move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert_eq!(s.think(), None);
        s.think();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(s.pending(), 0);

        // the loop keeps serving deliveries afterwards
        s.queue_every(Duration::MAX, || true);
        let worker = s.spawn().unwrap();
        let (tx, rx) = mpsc::channel();
        s.deliver(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        worker.shutdown();
    }

    #[test]
    fn test_double_start_rejected() {
        let s = scheduler();
        let worker = s.spawn().unwrap();
        assert!(matches!(s.spawn(), Err(SchedulerError::NotReady)));
        assert!(matches!(s.run(), Err(SchedulerError::NotReady)));
        worker.shutdown();
        let again = s.spawn().unwrap();
        drop(again);
        assert_eq!(s.state(), SchedulerState::Ready);
    }

    #[test]
    fn test_stop_discards_periodic_tasks() {
        let s = scheduler();
        s.queue_every(Duration::from_millis(1), || true);
        let worker = s.spawn().unwrap();
        thread::sleep(Duration::from_millis(10));
        worker.shutdown();
        assert_eq!(s.pending(), 0);
    }
}
