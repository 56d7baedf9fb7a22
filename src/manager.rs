//! The operation manager: public entry point for submitting operations,
//! running batches, and managing background tasks.
//!
//! The manager is constructed once at application start and passed to the
//! services that need it; there is no global accessor. Call
//! [`OperationManager::shutdown`] before dropping it to resolve every
//! outstanding result slot.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Semaphore};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::core::background::{BackgroundJob, BackgroundTask};
use crate::core::batch::{BatchMember, BatchOptions, BatchRecord, BatchStrategy, BatchSummary};
use crate::core::operation::{
    ErasedOutcome, OperationClass, OperationOptions, OperationRecord, OperationStatus,
    QueuedOperation,
};
use crate::core::resource_pool::{PoolSnapshot, ResourcePool};
use crate::core::scheduler::{
    CompletionSummary, OperationRegistry, SchedulerSnapshot, TaskScheduler,
};
use crate::core::{AppResult, SchedulerError};
use crate::util::clock::now_ms;

/// Awaitable handle for one submitted operation.
///
/// Holds the receiving half of the operation's single-assignment result
/// slot. Dropping the handle does not cancel the operation.
pub struct OperationHandle<T> {
    id: Uuid,
    rx: oneshot::Receiver<ErasedOutcome>,
    _result: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> OperationHandle<T> {
    /// Id of the submitted operation, usable as a dependency for later
    /// submissions.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Suspend until the operation reaches a terminal state, yielding its
    /// result or the captured error.
    pub async fn wait(self) -> Result<T, SchedulerError> {
        // A dropped sender means the unit was torn down before it could
        // resolve the slot, which only happens on cancellation.
        let outcome = self.rx.await.map_err(|_| SchedulerError::Cancelled)?;
        let value = outcome?;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| SchedulerError::Internal("result type mismatch".into()))
    }
}

/// Aggregate manager statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Operation records currently tracked (any status).
    pub operations_tracked: usize,
    /// Batch summaries currently retained.
    pub batches_tracked: usize,
    /// Background tasks currently tracked (including finished ones not
    /// yet pruned).
    pub background_tasks: usize,
    /// Mean execution time of completed operations, milliseconds.
    pub average_execution_ms: f64,
    /// Resource pool utilization and lifetime totals.
    pub pool: PoolSnapshot,
    /// Scheduler state.
    pub scheduler: SchedulerSnapshot,
}

/// Outcome of one cleanup sweep.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CleanupReport {
    /// Terminal operation records removed.
    pub operations_pruned: usize,
    /// Batch summaries removed.
    pub batches_pruned: usize,
    /// Finished background task handles dropped.
    pub background_pruned: usize,
}

/// The periodic sweep that bounds memory growth: terminal records older
/// than the retention window are removed, finished background handles
/// are dropped.
struct CleanupJob {
    registry: Arc<OperationRegistry>,
    batches: Arc<Mutex<HashMap<Uuid, BatchSummary>>>,
    background: Arc<Mutex<Vec<BackgroundTask>>>,
    retention: Duration,
}

impl CleanupJob {
    fn sweep(&self) -> CleanupReport {
        let cutoff = now_ms().saturating_sub(self.retention.as_millis());
        let operations_pruned = self.registry.prune_terminal_before(cutoff);

        let batches_pruned = {
            let mut batches = self.batches.lock();
            let before = batches.len();
            batches.retain(|_, summary| summary.completed_at_ms >= cutoff);
            before - batches.len()
        };

        let background_pruned = {
            let mut background = self.background.lock();
            let before = background.len();
            background.retain(|task| !task.is_finished());
            before - background.len()
        };

        if operations_pruned + batches_pruned + background_pruned > 0 {
            tracing::debug!(
                operations_pruned,
                batches_pruned,
                background_pruned,
                "cleanup sweep pruned records"
            );
        }
        CleanupReport {
            operations_pruned,
            batches_pruned,
            background_pruned,
        }
    }
}

#[async_trait]
impl BackgroundJob for CleanupJob {
    async fn run(&self) -> AppResult<()> {
        self.sweep();
        Ok(())
    }
}

/// Facade over the resource pool, scheduler, batch coordination, and
/// background task subsystem.
pub struct OperationManager {
    config: ManagerConfig,
    pool: Arc<ResourcePool>,
    registry: Arc<OperationRegistry>,
    scheduler: TaskScheduler,
    batches: Arc<Mutex<HashMap<Uuid, BatchSummary>>>,
    background: Arc<Mutex<Vec<BackgroundTask>>>,
    cleanup: Mutex<Option<BackgroundTask>>,
    retention: Duration,
    shutting_down: AtomicBool,
}

impl OperationManager {
    /// Validate the configuration, start the scheduler loop, and (if
    /// enabled) the periodic cleanup sweep.
    pub fn new(config: ManagerConfig) -> AppResult<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid manager config: {e}"))?;

        let pool = Arc::new(ResourcePool::new(
            config.capacities(),
            config.max_queue_depth,
        ));
        let registry = Arc::new(OperationRegistry::default());
        let scheduler = TaskScheduler::start(
            Arc::clone(&pool),
            Arc::clone(&registry),
            config.history_capacity,
        );
        let batches = Arc::new(Mutex::new(HashMap::new()));
        let background = Arc::new(Mutex::new(Vec::new()));

        let cleanup = if config.cleanup_enabled {
            Some(BackgroundTask::spawn(
                CleanupJob {
                    registry: Arc::clone(&registry),
                    batches: Arc::clone(&batches),
                    background: Arc::clone(&background),
                    retention: config.retention(),
                },
                Some(config.cleanup_interval()),
            ))
        } else {
            None
        };

        tracing::info!(
            read = config.read_capacity,
            write = config.write_capacity,
            transaction = config.transaction_capacity,
            queue_depth = config.max_queue_depth,
            "operation manager started"
        );

        let retention = config.retention();
        Ok(Self {
            config,
            pool,
            registry,
            scheduler,
            batches,
            background,
            cleanup: Mutex::new(cleanup),
            retention,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Submit an operation without awaiting it. Returns a handle whose id
    /// can be declared as a dependency of later submissions.
    ///
    /// Fails synchronously with [`SchedulerError::QueueFull`] when the
    /// wait queues are at capacity; the operation never enters the
    /// scheduler in that case.
    pub fn submit<F, T>(
        &self,
        work: F,
        opts: OperationOptions,
    ) -> Result<OperationHandle<T>, SchedulerError>
    where
        F: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let id = Uuid::new_v4();
        let timeout = opts.timeout.unwrap_or_else(|| self.config.default_timeout());
        let (queued, rx) = QueuedOperation::erase(id, &opts, timeout, work);

        self.registry.insert(OperationRecord {
            id,
            class: opts.class,
            priority: opts.priority,
            status: OperationStatus::Pending,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            timeout,
            dependencies: opts.dependencies,
            error: None,
        });

        if let Err(err) = self.pool.submit(queued) {
            self.registry.remove(id);
            return Err(err);
        }

        Ok(OperationHandle {
            id,
            rx,
            _result: PhantomData,
        })
    }

    /// Submit an operation and suspend until its result is delivered.
    /// Errors captured during execution are re-raised here.
    pub async fn execute_async<F, T>(
        &self,
        work: F,
        opts: OperationOptions,
    ) -> Result<T, SchedulerError>
    where
        F: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(work, opts)?.wait().await
    }

    /// Execute a group of operations under the chosen strategy.
    ///
    /// Member failures are captured into the returned record, never
    /// raised; the only error out of this call is failing to begin the
    /// batch at all.
    pub async fn execute_batch<T: Send + 'static>(
        &self,
        members: Vec<BatchMember<T>>,
        opts: BatchOptions,
    ) -> Result<BatchRecord<T>, SchedulerError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let id = Uuid::new_v4();
        let created_at_ms = now_ms();
        let mut member_ids = Vec::with_capacity(members.len());
        let mut results = Vec::with_capacity(members.len());
        let mut errors = Vec::new();

        tracing::debug!(batch = %id, strategy = ?opts.strategy, members = members.len(), "batch started");

        match opts.strategy {
            BatchStrategy::Parallel => {
                self.run_parallel(members, &opts, &mut member_ids, &mut results, &mut errors)
                    .await;
            }
            BatchStrategy::Sequential => {
                self.run_sequential(members, &opts, &mut member_ids, &mut results, &mut errors)
                    .await;
            }
            BatchStrategy::Mixed => {
                let (reads, others): (Vec<_>, Vec<_>) = members
                    .into_iter()
                    .partition(|m| m.class == OperationClass::Read);
                self.run_parallel(reads, &opts, &mut member_ids, &mut results, &mut errors)
                    .await;
                self.run_sequential(others, &opts, &mut member_ids, &mut results, &mut errors)
                    .await;
            }
        }

        let record = BatchRecord {
            id,
            strategy: opts.strategy,
            member_ids,
            results,
            errors,
            created_at_ms,
            completed_at_ms: now_ms(),
        };
        self.batches.lock().insert(id, record.summary());
        tracing::debug!(
            batch = %id,
            succeeded = record.success_count(),
            failed = record.failure_count(),
            "batch finished"
        );
        Ok(record)
    }

    /// Run members concurrently, bounded by the batch's own concurrency
    /// gate. Each member acquires the gate before it is submitted and
    /// holds it until its result arrives, so time spent waiting for a
    /// gate slot is never charged against the member's timeout and never
    /// ties up a pool permit.
    async fn run_parallel<T: Send + 'static>(
        &self,
        members: Vec<BatchMember<T>>,
        opts: &BatchOptions,
        member_ids: &mut Vec<Uuid>,
        results: &mut Vec<T>,
        errors: &mut Vec<SchedulerError>,
    ) {
        let gate = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
        let runs = members.into_iter().map(|member| {
            let gate = Arc::clone(&gate);
            async move {
                let BatchMember {
                    class,
                    priority,
                    work,
                } = member;
                let Ok(_slot) = gate.acquire_owned().await else {
                    return (
                        None,
                        Err(SchedulerError::Internal("batch gate closed".into())),
                    );
                };
                let mut op_opts = OperationOptions::new(class).with_priority(priority);
                if let Some(timeout) = opts.timeout {
                    op_opts = op_opts.with_timeout(timeout);
                }
                match self.submit(work, op_opts) {
                    Ok(handle) => {
                        let id = handle.id();
                        (Some(id), handle.wait().await)
                    }
                    Err(err) => (None, Err(err)),
                }
            }
        });
        for (id, outcome) in futures::future::join_all(runs).await {
            if let Some(id) = id {
                member_ids.push(id);
            }
            match outcome {
                Ok(value) => results.push(value),
                Err(err) => errors.push(err),
            }
        }
    }

    /// Run members strictly one after another. With `stop_on_error`, no
    /// member after the first failure is started; the skipped members are
    /// recorded as cancelled.
    async fn run_sequential<T: Send + 'static>(
        &self,
        members: Vec<BatchMember<T>>,
        opts: &BatchOptions,
        member_ids: &mut Vec<Uuid>,
        results: &mut Vec<T>,
        errors: &mut Vec<SchedulerError>,
    ) {
        let mut remaining = members.into_iter();
        while let Some(member) = remaining.next() {
            let BatchMember {
                class,
                priority,
                work,
            } = member;
            let mut op_opts = OperationOptions::new(class).with_priority(priority);
            if let Some(timeout) = opts.timeout {
                op_opts = op_opts.with_timeout(timeout);
            }
            let outcome = match self.submit(work, op_opts) {
                Ok(handle) => {
                    member_ids.push(handle.id());
                    handle.wait().await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(value) => results.push(value),
                Err(err) => {
                    errors.push(err);
                    if opts.stop_on_error {
                        for _skipped in remaining.by_ref() {
                            errors.push(SchedulerError::Cancelled);
                        }
                        break;
                    }
                }
            }
        }
    }

    /// Spawn a background task: one-shot when `interval` is `None`,
    /// otherwise periodic on the given interval. Periodic run errors are
    /// logged and the loop continues.
    pub fn create_background_task<J: BackgroundJob>(
        &self,
        job: J,
        interval: Option<Duration>,
    ) -> Result<Uuid, SchedulerError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let task = BackgroundTask::spawn(job, interval);
        let id = task.id;
        tracing::debug!(task = %id, ?interval, "background task created");
        self.background.lock().push(task);
        Ok(id)
    }

    /// Request cooperative cancellation of a background task. Returns
    /// whether a matching, still-running task was found.
    pub fn cancel_background_task(&self, id: Uuid) -> bool {
        let background = self.background.lock();
        background
            .iter()
            .find(|task| task.id == id)
            .is_some_and(BackgroundTask::cancel)
    }

    /// Current record for an operation, if still tracked.
    #[must_use]
    pub fn operation_status(&self, id: Uuid) -> Option<OperationRecord> {
        self.registry.get(id)
    }

    /// Summary for a finished batch, if still tracked.
    #[must_use]
    pub fn batch_status(&self, id: Uuid) -> Option<BatchSummary> {
        self.batches.lock().get(&id).cloned()
    }

    /// Recent completion summaries from the bounded history, oldest
    /// first.
    #[must_use]
    pub fn recent_completions(&self) -> Vec<CompletionSummary> {
        self.scheduler.history()
    }

    /// Aggregate statistics across the pool, scheduler, and retained
    /// records.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            operations_tracked: self.registry.len(),
            batches_tracked: self.batches.lock().len(),
            background_tasks: self.background.lock().len(),
            average_execution_ms: self.pool.average_execution_ms(),
            pool: self.pool.snapshot(),
            scheduler: self.scheduler.snapshot(),
        }
    }

    /// Run one cleanup sweep immediately, regardless of the periodic
    /// task. Prunes terminal records older than the retention window.
    pub fn run_cleanup(&self) -> CleanupReport {
        CleanupJob {
            registry: Arc::clone(&self.registry),
            batches: Arc::clone(&self.batches),
            background: Arc::clone(&self.background),
            retention: self.retention,
        }
        .sweep()
    }

    /// Stop the scheduler, cancel all background tasks, and await their
    /// completion. Outstanding result slots resolve with a cancellation
    /// error. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.shutdown().await;

        let cleanup = self.cleanup.lock().take();
        if let Some(task) = cleanup {
            task.cancel();
            let _ = task.handle.await;
        }

        let tasks: Vec<BackgroundTask> = {
            let mut background = self.background.lock();
            background.drain(..).collect()
        };
        for task in tasks {
            task.cancel();
            let _ = task.handle.await;
        }
        tracing::info!("operation manager shut down");
    }
}
