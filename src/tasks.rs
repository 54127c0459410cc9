use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed,
    /// The job declined to run, e.g. a previous run still holds its guard.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task: &'static str,
    pub outcome: TaskOutcome,
    pub at: DateTime<Utc>,
}

pub fn event_channel() -> broadcast::Sender<TaskEvent> {
    broadcast::channel(64).0
}

pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// The first run happens immediately, then every `period`. Ticks missed while a
    /// run is in progress are skipped, not replayed.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        events: broadcast::Sender<TaskEvent>,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let (shutdown, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    // fires on stop() and when the handle is dropped
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = job().await;
                match &outcome {
                    TaskOutcome::Failed(reason) => error!(task = name, error = %reason, "periodic task failed"),
                    TaskOutcome::Skipped => debug!(task = name, "periodic task skipped"),
                    TaskOutcome::Completed => debug!(task = name, "periodic task completed"),
                }
                // nobody listening is fine
                let _ = events.send(TaskEvent { task: name, outcome, at: Utc::now() });
            }
            debug!(task = name, "periodic task stopped");
        });

        Self { name, shutdown, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the timer and waits for the current run (if any) to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "periodic task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_on_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let events = event_channel();
        let mut rx = events.subscribe();

        let counter = runs.clone();
        let task = PeriodicTask::spawn("count", Duration::from_secs(10), events, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                TaskOutcome::Completed
            }
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.task, "count");
        assert_eq!(first.outcome, TaskOutcome::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        rx.recv().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_published() {
        let events = event_channel();
        let mut rx = events.subscribe();
        let task = PeriodicTask::spawn("broken", Duration::from_secs(5), events, || async {
            TaskOutcome::Failed("upstream down".into())
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.outcome, TaskOutcome::Failed("upstream down".into()));
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_current_run_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let events = event_channel();
        let mut rx = events.subscribe();

        let done = finished.clone();
        let task = PeriodicTask::spawn("slow", Duration::from_secs(1), events, move || {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                done.fetch_add(1, Ordering::SeqCst);
                TaskOutcome::Completed
            }
        });

        // let the first run start, then stop mid-run
        tokio::time::sleep(Duration::from_secs(5)).await;
        task.shutdown().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().outcome, TaskOutcome::Completed);
        assert!(rx.try_recv().is_err());
    }
}
