//! Tokio-backed scheduler.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::{PeriodicTask, Scheduler, TaskHandle};
use crate::error::{Error, Result};

/// Scheduler that drives each task from its own tokio task.
///
/// The callback itself runs on the blocking pool, so slow backends never
/// stall the runtime's workers. The next delay starts only after a run
/// finishes.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Creates a scheduler spawning onto `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Creates a scheduler on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when called outside a tokio runtime.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::configuration(format!("no tokio runtime available: {e}")))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        let (handle, cancelled) = TaskHandle::new();
        let loop_handle = handle.clone();

        self.runtime.spawn(async move {
            run_loop(task, initial_delay, period, loop_handle, cancelled).await;
        });

        debug!(
            initial_delay_ms = initial_delay.as_millis(),
            period_ms = period.as_millis(),
            "Scheduled periodic task"
        );
        handle
    }
}

async fn run_loop(
    task: PeriodicTask,
    initial_delay: Duration,
    period: Duration,
    handle: TaskHandle,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut delay = initial_delay;

    loop {
        tokio::select! {
            () = tokio::time::sleep(delay) => {},
            _ = cancelled.changed() => {},
        }
        let stop = *cancelled.borrow();
        if stop {
            break;
        }

        let run = task.clone();
        let failed = match tokio::task::spawn_blocking(move || run()).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(error = %e, "Periodic task failed, will retry next period");
                true
            },
            Err(join_err) => {
                error!(error = %join_err, "Periodic task panicked, will retry next period");
                true
            },
        };
        handle.record_run(failed);
        delay = period;
    }

    debug!(runs = handle.runs(), failures = handle.failures(), "Periodic task cancelled");
}
