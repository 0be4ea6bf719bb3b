//! Periodic task scheduling.
//!
//! Stores with [`ReloadPolicy::Interval`](crate::ReloadPolicy::Interval)
//! register a refresh callback with an injected [`Scheduler`] and keep the
//! returned [`TaskHandle`]. There is no process-wide scheduler: callers
//! construct one and pass it in, which keeps shutdown explicit and tests
//! isolated.
//!
//! # Example
//!
//! ```ignore
//! use propstore::scheduler::{Scheduler, TokioScheduler};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = TokioScheduler::current()?;
//! let handle = scheduler.schedule(
//!     Arc::new(|| { println!("tick"); Ok(()) }),
//!     Duration::from_secs(1),
//!     Duration::from_secs(1),
//! );
//! handle.cancel();
//! ```

mod runtime;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::Result;

pub use runtime::TokioScheduler;

/// Callback run on every tick. An `Err` is reported and the loop continues.
pub type PeriodicTask = Arc<dyn Fn() -> Result<()> + Send + Sync + 'static>;

/// Runs callbacks on a fixed delay.
pub trait Scheduler: Send + Sync + 'static {
    /// Schedules `task` to run after `initial_delay`, then `period` after each
    /// completed run. Runs never overlap.
    fn schedule(&self, task: PeriodicTask, initial_delay: Duration, period: Duration)
    -> TaskHandle;
}

#[derive(Debug, Default)]
struct TaskCounters {
    runs: AtomicU64,
    failures: AtomicU64,
}

/// Cancellation token and counters for one scheduled task.
///
/// Cancelling prevents future runs but never interrupts a run in progress.
/// [`cancel`](Self::cancel) is idempotent.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancel: Arc<watch::Sender<bool>>,
    counters: Arc<TaskCounters>,
}

impl TaskHandle {
    /// Creates a live handle and the receiver a scheduler loop listens on.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        let handle = Self {
            cancel: Arc::new(sender),
            counters: Arc::new(TaskCounters::default()),
        };
        (handle, receiver)
    }

    /// Stops future runs. Returns true if this call did the cancelling.
    pub fn cancel(&self) -> bool {
        !self.cancel.send_replace(true)
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Number of completed runs, successful or not.
    pub fn runs(&self) -> u64 {
        self.counters.runs.load(Ordering::Relaxed)
    }

    /// Number of runs that returned an error or panicked.
    pub fn failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    pub(crate) fn record_run(&self, failed: bool) {
        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}
