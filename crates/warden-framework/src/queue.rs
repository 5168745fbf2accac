//! Two-level admission control.
//!
//! Every command task passes through two [`AdmissionQueue`]s before it runs:
//!
//! ```text
//!  user "a" ─► [user:a  c=1, 3/1.5s] ─┐
//!  user "b" ─► [user:b  c=1, 3/1.5s] ─┼─► [global  c=20, 60/1s] ─► execute
//!  user "c" ─► [user:c  c=1, 3/1.5s] ─┘
//! ```
//!
//! The per-user queue holds its single slot for as long as the task waits in
//! *and* runs through the global queue, so one user's commands execute
//! strictly in submission order while the global queue caps total
//! throughput.
//!
//! A queue admits its head task only when a concurrency slot and a token of
//! the current rate window are both available. Waiters are served FIFO: the
//! head of the line holds a fair lock while it waits, so later arrivals
//! cannot overtake it.
//!
//! When admission is disabled, tasks run immediately.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify, Semaphore};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::error::AdmissionError;

// =============================================================================
// Settings
// =============================================================================

/// Limits of a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Maximum tasks executing at once.
    pub concurrency: usize,
    /// Tasks admitted per `interval`.
    pub interval_cap: u32,
    /// Length of the rate window.
    pub interval: Duration,
}

impl QueueLimits {
    pub fn new(concurrency: usize, interval_cap: u32, interval: Duration) -> Self {
        Self {
            concurrency,
            interval_cap,
            interval,
        }
    }
}

/// Settings of the two-level admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub enabled: bool,
    pub global: QueueLimits,
    pub user: QueueLimits,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            global: QueueLimits::new(20, 60, Duration::from_millis(1000)),
            user: QueueLimits::new(1, 3, Duration::from_millis(1500)),
        }
    }
}

// =============================================================================
// Gauge
// =============================================================================

/// A counter that can be awaited until it drops to zero.
#[derive(Debug, Default)]
struct Gauge {
    count: AtomicUsize,
    zero: Notify,
}

impl Gauge {
    fn enter(&self) -> GaugeGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        GaugeGuard(self)
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_zero(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct GaugeGuard<'a>(&'a Gauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.zero.notify_waiters();
        }
    }
}

// =============================================================================
// AdmissionQueue
// =============================================================================

/// Fixed rate window: at most `cap` admissions per `interval`.
#[derive(Debug)]
struct Window {
    started: Instant,
    admitted: u32,
}

impl Window {
    async fn take(&mut self, cap: u32, interval: Duration) {
        let now = Instant::now();
        if now >= self.started + interval {
            self.started = now;
            self.admitted = 0;
        }
        if self.admitted >= cap {
            let next = self.started + interval;
            sleep_until(next).await;
            self.started = next;
            self.admitted = 0;
        }
        self.admitted += 1;
    }
}

/// A concurrency- and rate-limited FIFO queue.
#[derive(Debug)]
pub struct AdmissionQueue {
    name: String,
    limits: QueueLimits,
    slots: Semaphore,
    /// Held by the head of the line while it waits for a slot and a token.
    window: AsyncMutex<Window>,
    pending: Gauge,
    running: Gauge,
    last_active: Mutex<Instant>,
}

impl AdmissionQueue {
    /// Creates a queue. Zero limits are raised to one.
    pub fn new(name: impl Into<String>, limits: QueueLimits) -> Self {
        let limits = QueueLimits {
            concurrency: limits.concurrency.max(1),
            interval_cap: limits.interval_cap.max(1),
            interval: limits.interval,
        };
        Self {
            name: name.into(),
            limits,
            slots: Semaphore::new(limits.concurrency),
            window: AsyncMutex::new(Window {
                started: Instant::now(),
                admitted: 0,
            }),
            pending: Gauge::default(),
            running: Gauge::default(),
            last_active: Mutex::new(Instant::now()),
        }
    }

    /// Queue name, e.g. `global` or `user:<id>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for admission, then runs `task` to completion.
    pub async fn run<F>(&self, task: F) -> Result<F::Output, AdmissionError>
    where
        F: Future,
    {
        let pending = self.pending.enter();
        let permit = {
            let mut window = self.window.lock().await;
            let permit = self.slots.acquire().await.map_err(|_| self.closed())?;
            window
                .take(self.limits.interval_cap, self.limits.interval)
                .await;
            permit
        };
        drop(pending);

        let _running = self.running.enter();
        self.touch();
        let output = task.await;
        drop(permit);
        self.touch();
        Ok(output)
    }

    /// Rejects every waiting and future task. Running tasks finish.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Tasks waiting for admission.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Tasks currently executing.
    pub fn running(&self) -> usize {
        self.running.get()
    }

    /// Returns `true` when nothing is waiting or running.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0 && self.running() == 0
    }

    /// Waits until nothing is waiting or running.
    pub async fn on_idle(&self) {
        self.pending.wait_zero().await;
        self.running.wait_zero().await;
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Idle, and its last rate window has certainly closed.
    fn is_stale(&self) -> bool {
        self.is_idle() && self.last_active.lock().elapsed() >= self.limits.interval
    }

    fn closed(&self) -> AdmissionError {
        AdmissionError::Closed {
            queue: self.name.clone(),
        }
    }
}

// =============================================================================
// AdmissionControl
// =============================================================================

/// Snapshot of the admission state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enabled: bool,
    /// Tasks submitted and not yet finished, across both levels.
    pub in_flight: usize,
    pub global_pending: usize,
    pub global_running: usize,
    /// Live per-user queues.
    pub user_queues: usize,
}

/// The global queue plus lazily created per-user queues.
#[derive(Debug)]
pub struct AdmissionControl {
    settings: QueueSettings,
    global: AdmissionQueue,
    users: Mutex<HashMap<String, Arc<AdmissionQueue>>>,
    in_flight: Gauge,
    closed: AtomicBool,
}

impl AdmissionControl {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            global: AdmissionQueue::new("global", settings.global),
            users: Mutex::new(HashMap::new()),
            in_flight: Gauge::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// The active settings.
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Submits `task` on behalf of `user` and waits for its output.
    ///
    /// The task first waits in the user's queue, then in the global queue.
    pub async fn submit<F>(&self, user: &str, task: F) -> Result<F::Output, AdmissionError>
    where
        F: Future,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdmissionError::Closed {
                queue: "admission".into(),
            });
        }
        let _in_flight = self.in_flight.enter();

        if !self.settings.enabled {
            return Ok(task.await);
        }

        let user_queue = self.user_queue(user);
        user_queue.run(self.global.run(task)).await?
    }

    fn user_queue(&self, user: &str) -> Arc<AdmissionQueue> {
        let mut users = self.users.lock();
        let queue = users.entry(user.to_string()).or_insert_with(|| {
            debug!(user, "Creating user queue");
            Arc::new(AdmissionQueue::new(format!("user:{user}"), self.settings.user))
        });
        Arc::clone(queue)
    }

    /// Drops per-user queues that are idle and whose rate window has closed.
    /// Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let mut users = self.users.lock();
        let before = users.len();
        // A queue cloned out by `submit` has a strong count above one.
        users.retain(|_, q| Arc::strong_count(q) > 1 || !q.is_stale());
        before - users.len()
    }

    /// Stops admitting new work. Tasks already running finish.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.global.close();
        for queue in self.users.lock().values() {
            queue.close();
        }
        info!("Admission control closed");
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits until every submitted task has finished or been rejected.
    pub async fn on_idle(&self) {
        self.in_flight.wait_zero().await;
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enabled: self.settings.enabled,
            in_flight: self.in_flight.get(),
            global_pending: self.global.pending(),
            global_running: self.global.running(),
            user_queues: self.users.lock().len(),
        }
    }
}
