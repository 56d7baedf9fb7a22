//! Background tasks: one-shot and periodic jobs outside the
//! request/response path, with cooperative cancellation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::AppResult;

/// A unit of background work.
///
/// Periodic tasks invoke `run` once per interval; errors are logged and
/// the loop continues on the same interval.
#[async_trait]
pub trait BackgroundJob: Send + Sync + 'static {
    /// Execute one run of the job.
    async fn run(&self) -> AppResult<()>;
}

/// Blanket implementation for plain async closures, so callers can pass
/// `|| async { ... }` factories without a named type.
#[async_trait]
impl<F, Fut> BackgroundJob for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
{
    async fn run(&self) -> AppResult<()> {
        (self)().await
    }
}

/// Handle to a spawned background task.
pub(crate) struct BackgroundTask {
    pub(crate) id: Uuid,
    pub(crate) handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

impl BackgroundTask {
    /// Spawn a job: one-shot when `interval` is `None`, otherwise
    /// self-rescheduling on a fixed interval until cancelled.
    pub(crate) fn spawn<J: BackgroundJob>(job: J, interval: Option<Duration>) -> Self {
        let id = Uuid::new_v4();
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            match interval {
                None => {
                    tokio::select! {
                        _ = cancelled.changed() => {
                            tracing::debug!(task = %id, "one-shot background task cancelled");
                        }
                        result = job.run() => {
                            if let Err(err) = result {
                                tracing::warn!(task = %id, error = %format!("{err:#}"), "background task failed");
                            }
                        }
                    }
                }
                Some(every) => loop {
                    tokio::select! {
                        _ = cancelled.changed() => break,
                        () = tokio::time::sleep(every) => {}
                    }
                    tokio::select! {
                        _ = cancelled.changed() => break,
                        result = job.run() => {
                            if let Err(err) = result {
                                tracing::warn!(
                                    task = %id,
                                    error = %format!("{err:#}"),
                                    "periodic background task run failed; continuing"
                                );
                            }
                        }
                    }
                },
            }
        });
        Self { id, handle, cancel }
    }

    /// Request cooperative cancellation. Returns false if the task has
    /// already finished.
    pub(crate) fn cancel(&self) -> bool {
        if self.handle.is_finished() {
            return false;
        }
        self.cancel.send(true).is_ok()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingJob {
        runs: Arc<AtomicU32>,
        fail_every_other: bool,
    }

    #[async_trait]
    impl BackgroundJob for CountingJob {
        async fn run(&self) -> AppResult<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other && run % 2 == 0 {
                anyhow::bail!("simulated failure on run {run}");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn one_shot_runs_once() {
        let runs = Arc::new(AtomicU32::new(0));
        let task = BackgroundTask::spawn(
            CountingJob {
                runs: Arc::clone(&runs),
                fail_every_other: false,
            },
            None,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
        assert!(!task.cancel());
    }

    #[tokio::test]
    async fn periodic_survives_errors_and_cancels() {
        let runs = Arc::new(AtomicU32::new(0));
        let task = BackgroundTask::spawn(
            CountingJob {
                runs: Arc::clone(&runs),
                fail_every_other: true,
            },
            Some(Duration::from_millis(10)),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Errors on even runs must not stop the loop.
        assert!(runs.load(Ordering::SeqCst) >= 3);

        assert!(task.cancel());
        let _ = task.handle.await;
        let after_cancel = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn closure_jobs_are_accepted() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let task = BackgroundTask::spawn(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            None,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let _ = task.handle.await;
    }
}
