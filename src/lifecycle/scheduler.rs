//! Single-slot delayed task runner for reconnect attempts
//!
//! At most one reconnect task is pending at any time. A task leaves the
//! pending slot the moment its delay elapses, so the attempt it runs may
//! schedule its own successor.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

/// Result of a scheduling request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new task was queued
    Scheduled,
    /// A task was already waiting; nothing queued
    AlreadyPending,
    /// The connection is up; nothing to recover
    NotNeeded,
    /// A connect attempt is running and queues its own successor on failure
    InFlight,
    /// The scheduler has been cancelled for shutdown
    ShutDown,
}

/// Handle to a queued reconnect attempt
#[derive(Debug)]
pub struct ReconnectTask {
    id: u64,
    delay: Duration,
    handle: AbortHandle,
}

impl ReconnectTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[derive(Debug, Default)]
struct Slots {
    pending: Option<ReconnectTask>,
    running: Option<ReconnectTask>,
    closed: bool,
}

/// Delayed task runner with idempotent scheduling
///
/// Actions run on their own tokio task, never on the caller's.
#[derive(Debug, Default)]
pub struct ReconnectScheduler {
    slots: Arc<Mutex<Slots>>,
    next_id: AtomicU64,
    scheduled_total: AtomicU64,
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action` to run after `delay` unless a task is already pending
    pub fn schedule<F>(&self, delay: Duration, action: F) -> ScheduleOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        if slots.closed {
            return ScheduleOutcome::ShutDown;
        }
        if slots.pending.is_some() {
            return ScheduleOutcome::AlreadyPending;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.slots);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !Self::promote(&shared, id) {
                return;
            }
            action.await;
            Self::retire(&shared, id);
        });

        slots.pending = Some(ReconnectTask {
            id,
            delay,
            handle: handle.abort_handle(),
        });
        self.scheduled_total.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = id, delay_ms = delay.as_millis() as u64, "Reconnect task queued");
        ScheduleOutcome::Scheduled
    }

    /// Move a due task from pending to running; false if it was cancelled
    fn promote(slots: &Mutex<Slots>, id: u64) -> bool {
        let mut slots = lock(slots);
        match slots.pending.take() {
            Some(task) if task.id == id => {
                slots.running = Some(task);
                true
            }
            other => {
                slots.pending = other;
                false
            }
        }
    }

    fn retire(slots: &Mutex<Slots>, id: u64) {
        let mut slots = lock(slots);
        if slots.running.as_ref().is_some_and(|task| task.id == id) {
            slots.running = None;
        }
    }

    /// Cancel the pending task and any attempt in flight, then refuse new work
    ///
    /// Returns how many tasks were aborted.
    pub fn cancel_all(&self) -> usize {
        let mut slots = lock(&self.slots);
        slots.closed = true;
        [slots.pending.take(), slots.running.take()]
            .into_iter()
            .flatten()
            .map(|task| {
                task.handle.abort();
                debug!(task_id = task.id, "Reconnect task cancelled");
            })
            .count()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.slots).pending.is_some()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.slots).running.is_some()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.slots).closed
    }

    /// Total number of tasks ever queued
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled_total.load(Ordering::Relaxed)
    }
}
