use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// A named background task that runs its body once per period.
///
/// Each run is awaited to completion before the next tick is taken, and
/// ticks missed while a run was in flight are skipped rather than queued.
/// The first run happens one full period after spawning. Dropping the task
/// aborts it.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns the task on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut body: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                body().await;
            }
        });
        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels pending ticks. A run already in progress is aborted at its
    /// next await point.
    pub fn stop(self) {
        tracing::debug!(task = self.name, "Periodic task stopped");
        self.handle.abort();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
