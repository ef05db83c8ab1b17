//! Expiration Scheduler (Time Wheel)
//!
//! Schedules per-key expiry jobs without a priority queue. The wheel is a
//! ring of slots advanced one slot per tick; a task whose delay exceeds one
//! revolution carries a `circle` count of revolutions still owed.
//!
//! ```text
//!              current
//!                 │
//!   ┌────┬────┬───▼┬────┬────┬────┬────┬────┐
//!   │ s0 │ s1 │ s2 │ s3 │ s4 │ s5 │ s6 │ s7 │   one tick = one slot
//!   └────┴────┴────┴────┴─┬──┴────┴────┴────┘
//!                         │
//!                   { key: task(circle = 1) }
//! ```
//!
//! ## Concurrency
//!
//! The slot lists are owned by a single tokio task. Callers never touch
//! them; they send `Add`/`Remove` requests over an unbounded channel through
//! a cloneable [`TimerHandle`], so scheduling never blocks a command.
//!
//! Due jobs run on tokio's blocking pool because expiry jobs take key lock
//! stripes. A job that has started cannot be cancelled; expiry jobs
//! re-validate the stored deadline under the key's lock instead.
//!
//! Without a tokio runtime the wheel does not start and the handle discards
//! requests. Lazy expiry on access still keeps reads correct.

use crate::config::TimeWheelConfig;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// A scheduled callback.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Request {
    Add { key: Bytes, delay: Duration, job: Job },
    Remove { key: Bytes },
}

struct Task {
    job: Job,
    circle: usize,
}

/// The slot ring. Owned exclusively by the control loop.
struct Wheel {
    interval: Duration,
    slots: Vec<HashMap<Bytes, Task>>,
    positions: HashMap<Bytes, usize>,
    current: usize,
}

impl Wheel {
    fn new(interval: Duration, slots: usize) -> Self {
        assert!(slots > 0, "time wheel needs at least one slot");
        assert!(!interval.is_zero(), "time wheel interval must be positive");
        Self {
            interval,
            slots: (0..slots).map(|_| HashMap::new()).collect(),
            positions: HashMap::new(),
            current: 0,
        }
    }

    /// Number of ticks until `delay` has elapsed, at least one.
    fn ticks_for(&self, delay: Duration) -> usize {
        let step = self.interval.as_nanos();
        let ticks = delay.as_nanos().div_ceil(step).max(1);
        usize::try_from(ticks).unwrap_or(usize::MAX)
    }

    /// Schedules `job`, replacing any pending task with the same key.
    fn add(&mut self, key: Bytes, delay: Duration, job: Job) {
        self.remove(&key);

        let n = self.slots.len();
        let ticks = self.ticks_for(delay);
        let slot = (self.current + ticks % n) % n;
        let circle = (ticks - 1) / n;

        trace!(key = ?key, ticks, slot, circle, "timer scheduled");
        self.positions.insert(key.clone(), slot);
        self.slots[slot].insert(key, Task { job, circle });
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        match self.positions.remove(key) {
            Some(slot) => self.slots[slot].remove(key).is_some(),
            None => false,
        }
    }

    /// Advances one slot and returns the jobs that became due.
    fn tick(&mut self) -> Vec<Job> {
        self.current = (self.current + 1) % self.slots.len();

        let pending = std::mem::take(&mut self.slots[self.current]);
        if pending.is_empty() {
            return Vec::new();
        }

        let mut due = Vec::new();
        let mut kept = HashMap::new();
        for (key, mut task) in pending {
            if task.circle > 0 {
                task.circle -= 1;
                kept.insert(key, task);
            } else {
                self.positions.remove(&key);
                due.push(task.job);
            }
        }
        self.slots[self.current] = kept;
        due
    }

    fn pending(&self) -> usize {
        self.positions.len()
    }
}

/// Cloneable scheduling handle shared by every database.
#[derive(Clone)]
pub struct TimerHandle {
    tx: Option<mpsc::UnboundedSender<Request>>,
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

impl TimerHandle {
    /// A handle that is not connected to any wheel.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// True while the control loop is accepting requests.
    pub fn is_running(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn send(&self, request: Request) {
        if let Some(tx) = &self.tx {
            // A closed channel means the wheel has stopped; lazy expiry covers it.
            let _ = tx.send(request);
        }
    }

    /// Runs `job` once `delay` has elapsed, replacing any task under `key`.
    pub fn add(&self, key: Bytes, delay: Duration, job: Job) {
        self.send(Request::Add { key, delay, job });
    }

    /// Runs `job` at wall-clock instant `at` (immediately if already past).
    pub fn add_at(&self, key: Bytes, at: SystemTime, job: Job) {
        let delay = at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        self.add(key, delay, job);
    }

    /// Cancels the task under `key`, if any.
    pub fn remove(&self, key: Bytes) {
        self.send(Request::Remove { key });
    }
}

/// The running time wheel. Dropping it stops the control loop.
#[derive(Debug)]
pub struct TimeWheel {
    handle: TimerHandle,
    shutdown_tx: watch::Sender<bool>,
}

impl TimeWheel {
    /// Starts the control loop on the current tokio runtime.
    pub fn start(config: &TimeWheelConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = match Handle::try_current() {
            Ok(runtime) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let wheel = Wheel::new(config.interval, config.slots);
                runtime.spawn(wheel_loop(wheel, rx, shutdown_rx));
                info!(
                    interval_ms = config.interval.as_millis() as u64,
                    slots = config.slots,
                    "Time wheel started"
                );
                TimerHandle { tx: Some(tx) }
            }
            Err(_) => {
                warn!("No tokio runtime; active expiry disabled, relying on lazy expiry");
                TimerHandle::detached()
            }
        };

        Self {
            handle,
            shutdown_tx,
        }
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Stops the control loop. Pending tasks are dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Time wheel stopped");
        }
    }
}

impl Drop for TimeWheel {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn wheel_loop(
    mut wheel: Wheel,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(wheel.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let due = wheel.tick();
                if !due.is_empty() {
                    debug!(count = due.len(), pending = wheel.pending(), "Timer jobs due");
                }
                for job in due {
                    tokio::task::spawn_blocking(job);
                }
            }
            request = requests.recv() => match request {
                Some(Request::Add { key, delay, job }) => wheel.add(key, delay, job),
                Some(Request::Remove { key }) => {
                    wheel.remove(&key);
                }
                None => {
                    debug!("Time wheel request channel closed");
                    return;
                }
            },
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Time wheel received shutdown signal");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn run_ticks(wheel: &mut Wheel, ticks: usize) -> usize {
        let mut fired = 0;
        for _ in 0..ticks {
            for job in wheel.tick() {
                job();
                fired += 1;
            }
        }
        fired
    }

    // ========================================================================
    // Slot arithmetic
    // ========================================================================

    #[test]
    fn test_fires_after_rounded_up_ticks() {
        let mut wheel = Wheel::new(Duration::from_millis(100), 8);
        let counter = Arc::new(AtomicUsize::new(0));
        wheel.add(Bytes::from("k"), Duration::from_millis(250), counting_job(&counter));

        assert_eq!(run_ticks(&mut wheel, 2), 0);
        assert_eq!(run_ticks(&mut wheel, 1), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.pending(), 0);
    }

    #[test]
    fn test_zero_delay_fires_on_next_tick() {
        let mut wheel = Wheel::new(Duration::from_millis(100), 8);
        let counter = Arc::new(AtomicUsize::new(0));
        wheel.add(Bytes::from("k"), Duration::ZERO, counting_job(&counter));
        assert_eq!(run_ticks(&mut wheel, 1), 1);
    }

    #[test]
    fn test_delay_longer_than_a_revolution_uses_circles() {
        let mut wheel = Wheel::new(Duration::from_millis(10), 4);
        let counter = Arc::new(AtomicUsize::new(0));
        // 11 ticks on a 4-slot wheel: two full revolutions plus three slots.
        wheel.add(Bytes::from("k"), Duration::from_millis(110), counting_job(&counter));

        assert_eq!(run_ticks(&mut wheel, 10), 0);
        assert_eq!(run_ticks(&mut wheel, 1), 1);
    }

    #[test]
    fn test_exact_revolution_lands_on_current_slot() {
        let mut wheel = Wheel::new(Duration::from_millis(10), 4);
        let counter = Arc::new(AtomicUsize::new(0));
        wheel.add(Bytes::from("k"), Duration::from_millis(40), counting_job(&counter));
        assert_eq!(run_ticks(&mut wheel, 3), 0);
        assert_eq!(run_ticks(&mut wheel, 1), 1);
    }

    #[test]
    fn test_re_add_supersedes_previous_task() {
        let mut wheel = Wheel::new(Duration::from_millis(10), 8);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        wheel.add(Bytes::from("k"), Duration::from_millis(20), counting_job(&first));
        wheel.add(Bytes::from("k"), Duration::from_millis(60), counting_job(&second));
        assert_eq!(wheel.pending(), 1);

        run_ticks(&mut wheel, 8);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_cancels() {
        let mut wheel = Wheel::new(Duration::from_millis(10), 8);
        let counter = Arc::new(AtomicUsize::new(0));
        wheel.add(Bytes::from("k"), Duration::from_millis(20), counting_job(&counter));
        assert!(wheel.remove(b"k"));
        assert!(!wheel.remove(b"k"));
        assert_eq!(run_ticks(&mut wheel, 8), 0);
    }

    // ========================================================================
    // Runtime
    // ========================================================================

    #[tokio::test]
    async fn test_running_wheel_fires_jobs() {
        let wheel = TimeWheel::start(&TimeWheelConfig {
            interval: Duration::from_millis(10),
            slots: 16,
        });
        let handle = wheel.handle();
        assert!(handle.is_running());

        let fired = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        handle.add(Bytes::from("a"), Duration::from_millis(30), counting_job(&fired));
        handle.add(Bytes::from("b"), Duration::from_millis(30), counting_job(&cancelled));
        handle.remove(Bytes::from("b"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_closes_handle() {
        let wheel = TimeWheel::start(&TimeWheelConfig {
            interval: Duration::from_millis(10),
            slots: 16,
        });
        let handle = wheel.handle();
        drop(wheel);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_running());
    }

    #[test]
    fn test_without_runtime_is_detached() {
        let wheel = TimeWheel::start(&TimeWheelConfig::default());
        let handle = wheel.handle();
        assert!(!handle.is_running());
        // Sending to a detached handle is a no-op.
        handle.add(Bytes::from("k"), Duration::ZERO, Box::new(|| {}));
    }
}
