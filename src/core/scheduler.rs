//! The dispatch loop: pulls ready operations from the resource pool,
//! resolves dependencies, and drives each operation to a terminal state.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::operation::{OperationRecord, OperationStatus, QueuedOperation};
use crate::core::resource_pool::ResourcePool;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

/// Poll interval while the queues are empty or the head operation is
/// waiting on a dependency.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Bounded wait for the dispatch loop to exit before it is aborted.
const LOOP_EXIT_WAIT: Duration = Duration::from_secs(1);

/// Dependency readiness of a dequeued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepsState {
    /// Every dependency is completed or already pruned.
    Ready,
    /// At least one dependency is still pending or running.
    Waiting,
    /// A dependency reached a failed terminal state; the operation can
    /// never become ready.
    Failed(Uuid),
}

/// Shared registry of operation records, keyed by id.
///
/// Records are inserted at submission, mutated by the scheduler, and
/// pruned by the cleanup sweep. Status transitions are monotonic: once a
/// record is terminal it is never rewritten.
#[derive(Default)]
pub(crate) struct OperationRegistry {
    ops: Mutex<HashMap<Uuid, OperationRecord>>,
}

impl OperationRegistry {
    pub(crate) fn insert(&self, record: OperationRecord) {
        self.ops.lock().insert(record.id, record);
    }

    pub(crate) fn get(&self, id: Uuid) -> Option<OperationRecord> {
        self.ops.lock().get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Drop a record outright. Used when a submission is rejected before
    /// it ever enters the scheduler.
    pub(crate) fn remove(&self, id: Uuid) {
        self.ops.lock().remove(&id);
    }

    fn mark_running(&self, id: Uuid, at_ms: u128) {
        if let Some(record) = self.ops.lock().get_mut(&id) {
            if record.status == OperationStatus::Pending {
                record.status = OperationStatus::Running;
                record.started_at_ms = Some(at_ms);
            }
        }
    }

    /// Transition a record to a terminal status and return its execution
    /// duration for the statistics counters. No-op if already terminal.
    fn mark_terminal(
        &self,
        id: Uuid,
        status: OperationStatus,
        at_ms: u128,
        error: Option<String>,
    ) -> Option<u128> {
        let mut ops = self.ops.lock();
        let record = ops.get_mut(&id)?;
        if record.status.is_terminal() {
            return None;
        }
        record.status = status;
        record.completed_at_ms = Some(at_ms);
        record.error = error;
        record.execution_ms()
    }

    /// Cancel a record that has not reached a terminal state. Returns
    /// whether the transition happened.
    pub(crate) fn mark_cancelled_if_active(&self, id: Uuid, at_ms: u128) -> bool {
        let mut ops = self.ops.lock();
        match ops.get_mut(&id) {
            Some(record) if !record.status.is_terminal() => {
                record.status = OperationStatus::Cancelled;
                record.completed_at_ms = Some(at_ms);
                record.error = Some("cancelled during shutdown".into());
                true
            }
            _ => false,
        }
    }

    /// Readiness of an operation given its declared dependencies. An id
    /// absent from the registry counts as satisfied: the record was
    /// already completed and pruned.
    pub(crate) fn deps_state(&self, dependencies: &[Uuid]) -> DepsState {
        if dependencies.is_empty() {
            return DepsState::Ready;
        }
        let ops = self.ops.lock();
        let mut waiting = false;
        for dep in dependencies {
            match ops.get(dep).map(|r| r.status) {
                None | Some(OperationStatus::Completed) => {}
                Some(OperationStatus::Pending | OperationStatus::Running) => waiting = true,
                Some(
                    OperationStatus::Failed
                    | OperationStatus::Cancelled
                    | OperationStatus::TimedOut,
                ) => return DepsState::Failed(*dep),
            }
        }
        if waiting {
            DepsState::Waiting
        } else {
            DepsState::Ready
        }
    }

    /// Remove terminal records whose completion time is older than the
    /// cutoff. Returns the number pruned.
    pub(crate) fn prune_terminal_before(&self, cutoff_ms: u128) -> usize {
        let mut ops = self.ops.lock();
        let before = ops.len();
        ops.retain(|_, record| {
            !(record.status.is_terminal()
                && record.completed_at_ms.is_some_and(|t| t < cutoff_ms))
        });
        before - ops.len()
    }
}

/// Summary of one completed operation, kept in the bounded history ring.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionSummary {
    /// Operation id.
    pub id: Uuid,
    /// Terminal timestamp, milliseconds since epoch.
    pub completed_at_ms: u128,
    /// Whether the operation completed successfully.
    pub success: bool,
}

/// Point-in-time scheduler state for observability.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    /// Units currently executing.
    pub running: usize,
    /// Entries in the bounded completion history.
    pub recorded_completions: usize,
}

struct SchedulerCore {
    pool: Arc<ResourcePool>,
    registry: Arc<OperationRegistry>,
    running: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    history: Mutex<VecDeque<CompletionSummary>>,
    history_capacity: usize,
}

impl SchedulerCore {
    fn push_history(&self, id: Uuid, success: bool) {
        let mut history = self.history.lock();
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(CompletionSummary {
            id,
            completed_at_ms: now_ms(),
            success,
        });
    }

    fn running_len(&self) -> usize {
        let mut running = self.running.lock();
        running.retain(|_, handle| !handle.is_finished());
        running.len()
    }

    /// Resolve an operation whose dependency failed: it never runs.
    fn resolve_dependency_failure(&self, op: QueuedOperation, dep: Uuid) {
        tracing::warn!(operation = %op.id, dependency = %dep, "dependency failed; operation not dispatched");
        let exec_ms = self.registry.mark_terminal(
            op.id,
            OperationStatus::Failed,
            now_ms(),
            Some(format!("dependency {dep} failed")),
        );
        self.pool.note_terminal(OperationStatus::Failed, exec_ms);
        let _ = op.slot.send(Err(SchedulerError::DependencyFailed(dep)));
        self.push_history(op.id, false);
    }

    fn spawn_unit(self: &Arc<Self>, op: QueuedOperation) {
        let id = op.id;
        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            core.run_unit(op).await;
        });
        self.running.lock().insert(id, handle);
    }

    /// Execution wrapper for one dispatched unit: acquire the class slot,
    /// race the payload against its timeout, resolve the result slot
    /// exactly once, and record the outcome.
    async fn run_unit(self: Arc<Self>, op: QueuedOperation) {
        let QueuedOperation {
            id,
            class,
            timeout,
            payload,
            slot,
            ..
        } = op;

        self.registry.mark_running(id, now_ms());
        tracing::debug!(operation = %id, ?class, "operation dispatched");

        let permit = match self.pool.acquire(class).await {
            Ok(permit) => permit,
            Err(err) => {
                let exec_ms = self.registry.mark_terminal(
                    id,
                    OperationStatus::Cancelled,
                    now_ms(),
                    Some(err.to_string()),
                );
                self.pool.note_terminal(OperationStatus::Cancelled, exec_ms);
                let _ = slot.send(Err(err));
                self.push_history(id, false);
                self.running.lock().remove(&id);
                return;
            }
        };

        let raced = tokio::time::timeout(timeout, payload).await;
        // Slot released before bookkeeping so waiters can proceed.
        drop(permit);

        match raced {
            Ok(Ok(value)) => {
                let exec_ms =
                    self.registry
                        .mark_terminal(id, OperationStatus::Completed, now_ms(), None);
                self.pool.note_terminal(OperationStatus::Completed, exec_ms);
                let _ = slot.send(Ok(value));
                self.push_history(id, true);
                tracing::debug!(operation = %id, "operation completed");
            }
            Ok(Err(err)) => {
                let text = format!("{err:#}");
                let exec_ms = self.registry.mark_terminal(
                    id,
                    OperationStatus::Failed,
                    now_ms(),
                    Some(text.clone()),
                );
                self.pool.note_terminal(OperationStatus::Failed, exec_ms);
                let _ = slot.send(Err(SchedulerError::Payload(err)));
                self.push_history(id, false);
                tracing::warn!(operation = %id, error = %text, "operation failed");
            }
            Err(_elapsed) => {
                let exec_ms = self.registry.mark_terminal(
                    id,
                    OperationStatus::TimedOut,
                    now_ms(),
                    Some(format!("timed out after {timeout:?}")),
                );
                self.pool.note_terminal(OperationStatus::TimedOut, exec_ms);
                let _ = slot.send(Err(SchedulerError::TimedOut(timeout)));
                self.push_history(id, false);
                tracing::warn!(operation = %id, ?timeout, "operation timed out");
            }
        }

        self.running.lock().remove(&id);
    }
}

/// The scheduling loop and its execution units.
///
/// A single logical loop pulls the highest-priority ready operation from
/// the pool, checks its dependencies, and launches it as an independently
/// scheduled unit. Operations whose dependencies are still in flight are
/// pushed back to the tail of their priority queue instead of being
/// dropped.
pub(crate) struct TaskScheduler {
    core: Arc<SchedulerCore>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Start the dispatch loop against the given pool and registry.
    pub(crate) fn start(
        pool: Arc<ResourcePool>,
        registry: Arc<OperationRegistry>,
        history_capacity: usize,
    ) -> Self {
        let core = Arc::new(SchedulerCore {
            pool,
            registry,
            running: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.min(1024))),
            history_capacity,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_core = Arc::clone(&core);
        let handle = tokio::spawn(dispatch_loop(loop_core, shutdown_rx));
        Self {
            core,
            shutdown_tx,
            loop_handle: Mutex::new(Some(handle)),
        }
    }

    /// Snapshot of running units and history length.
    pub(crate) fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            running: self.core.running_len(),
            recorded_completions: self.core.history.lock().len(),
        }
    }

    /// Recent completion summaries, oldest first.
    pub(crate) fn history(&self) -> Vec<CompletionSummary> {
        self.core.history.lock().iter().cloned().collect()
    }

    /// Stop the loop, cancel in-flight units, and resolve every queued
    /// operation with a cancellation error. Idempotent.
    pub(crate) async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let loop_handle = self.loop_handle.lock().take();
        if let Some(mut handle) = loop_handle {
            if tokio::time::timeout(LOOP_EXIT_WAIT, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
                let _ = handle.await;
            }
        }

        let running: Vec<(Uuid, JoinHandle<()>)> =
            self.core.running.lock().drain().collect();
        for (id, handle) in running {
            handle.abort();
            // Join errors from aborted units are expected here.
            let _ = handle.await;
            if self
                .core
                .registry
                .mark_cancelled_if_active(id, now_ms())
            {
                self.core
                    .pool
                    .note_terminal(OperationStatus::Cancelled, None);
                self.core.push_history(id, false);
            }
        }

        for op in self.core.pool.drain() {
            if self
                .core
                .registry
                .mark_cancelled_if_active(op.id, now_ms())
            {
                self.core
                    .pool
                    .note_terminal(OperationStatus::Cancelled, None);
            }
            let _ = op.slot.send(Err(SchedulerError::Cancelled));
        }

        tracing::info!("scheduler shut down");
    }
}

async fn dispatch_loop(core: Arc<SchedulerCore>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match core.pool.next_ready() {
            Some(op) => match core.registry.deps_state(&op.dependencies) {
                DepsState::Ready => core.spawn_unit(op),
                DepsState::Waiting => {
                    core.pool.requeue(op);
                    // The head of the queue is blocked; back off instead
                    // of spinning on the same item.
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        () = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
                DepsState::Failed(dep) => core.resolve_dependency_failure(op, dep),
            },
            None => {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    () = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
        }
    }
    tracing::debug!("dispatch loop exited");
}
