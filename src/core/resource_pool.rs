//! Admission control: per-class concurrency limiters, priority wait
//! queues, and utilization statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::operation::{OperationClass, OperationStatus, Priority, QueuedOperation};
use crate::core::SchedulerError;

/// The three concurrency limiters backing the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterClass {
    /// Read-side limiter.
    Read,
    /// Write-side limiter.
    Write,
    /// Transaction limiter.
    Transaction,
}

impl LimiterClass {
    const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Transaction => 2,
        }
    }

    /// Fixed operation-class to limiter mapping, resolved at compile time
    /// rather than re-evaluated against strings per call.
    #[must_use]
    pub const fn for_operation(class: OperationClass) -> Self {
        match class {
            OperationClass::Read | OperationClass::Background => Self::Read,
            OperationClass::Write | OperationClass::BatchMember => Self::Write,
            OperationClass::Transaction => Self::Transaction,
        }
    }
}

/// Per-class concurrency capacities, fixed at construction.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClassCapacities {
    /// Concurrent read slots.
    pub read: usize,
    /// Concurrent write slots.
    pub write: usize,
    /// Concurrent transaction slots.
    pub transaction: usize,
}

impl ClassCapacities {
    const fn get(&self, limiter: LimiterClass) -> usize {
        match limiter {
            LimiterClass::Read => self.read,
            LimiterClass::Write => self.write,
            LimiterClass::Transaction => self.transaction,
        }
    }
}

/// Atomic counters shared between the pool and in-flight permits.
#[derive(Debug, Default)]
struct PoolCounters {
    running: [AtomicUsize; LimiterClass::COUNT],
    peak_running: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    total_exec_ms: AtomicU64,
}

/// A held concurrency slot. Dropping the permit releases the slot and
/// decrements the running gauge, regardless of how execution exits.
pub(crate) struct ClassPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<PoolCounters>,
    limiter: LimiterClass,
}

impl Drop for ClassPermit {
    fn drop(&mut self) {
        self.counters.running[self.limiter.index()].fetch_sub(1, Ordering::AcqRel);
    }
}

/// Utilization snapshot for one limiter.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    /// Configured capacity.
    pub capacity: usize,
    /// Operations currently holding a slot.
    pub running: usize,
    /// `running / capacity` as a percentage.
    pub utilization_pct: f64,
}

/// Point-in-time view of pool state and lifetime totals.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    /// Read limiter state.
    pub read: LimiterSnapshot,
    /// Write limiter state.
    pub write: LimiterSnapshot,
    /// Transaction limiter state.
    pub transaction: LimiterSnapshot,
    /// Operations waiting across all priority queues.
    pub queued: usize,
    /// Highest observed aggregate concurrency.
    pub peak_running: usize,
    /// Total operations admitted to the queues.
    pub submitted: u64,
    /// Operations that completed successfully.
    pub completed: u64,
    /// Operations that failed with a payload error.
    pub failed: u64,
    /// Operations that hit their timeout.
    pub timed_out: u64,
    /// Operations cancelled before completion.
    pub cancelled: u64,
    /// Submissions rejected for queue overflow.
    pub rejected: u64,
}

/// Wait-queue state guarded by one mutex: the four priority FIFOs plus
/// the closed flag `drain` sets at shutdown. Admission and closure are
/// decided under the same lock, so a submission can never slip in
/// between the flag flip and the drain.
#[derive(Default)]
struct QueueState {
    queues: [VecDeque<QueuedOperation>; 4],
    closed: bool,
}

/// Resource pool: three fixed-capacity limiters plus four priority FIFO
/// wait queues. Admission is rejected, never blocked, once the total
/// queue depth reaches the configured maximum.
pub struct ResourcePool {
    capacities: ClassCapacities,
    limiters: [Arc<Semaphore>; LimiterClass::COUNT],
    max_queue_depth: usize,
    queues: Mutex<QueueState>,
    counters: Arc<PoolCounters>,
}

impl ResourcePool {
    /// Create a pool with the given per-class capacities and queue depth.
    #[must_use]
    pub fn new(capacities: ClassCapacities, max_queue_depth: usize) -> Self {
        Self {
            capacities,
            limiters: [
                Arc::new(Semaphore::new(capacities.read)),
                Arc::new(Semaphore::new(capacities.write)),
                Arc::new(Semaphore::new(capacities.transaction)),
            ],
            max_queue_depth,
            queues: Mutex::new(QueueState::default()),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Enqueue an operation at the tail of its priority queue, rejecting
    /// when the total queue depth is at capacity or the pool has been
    /// closed by `drain`.
    pub(crate) fn submit(&self, op: QueuedOperation) -> Result<(), SchedulerError> {
        let mut state = self.queues.lock();
        if state.closed {
            return Err(SchedulerError::Shutdown);
        }
        let depth: usize = state.queues.iter().map(VecDeque::len).sum();
        if depth >= self.max_queue_depth {
            self.counters.rejected.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(
                operation = %op.id,
                depth,
                "submission rejected: queue full"
            );
            return Err(SchedulerError::QueueFull(format!(
                "max queue depth {} reached",
                self.max_queue_depth
            )));
        }
        tracing::debug!(operation = %op.id, priority = ?op.priority, "operation enqueued");
        state.queues[op.priority.queue_index()].push_back(op);
        self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Pop the oldest operation from the highest-priority non-empty
    /// queue, or `None` when all queues are empty.
    pub(crate) fn next_ready(&self) -> Option<QueuedOperation> {
        let mut state = self.queues.lock();
        for priority in Priority::DISPATCH_ORDER {
            if let Some(op) = state.queues[priority.queue_index()].pop_front() {
                return Some(op);
            }
        }
        None
    }

    /// Push a dequeued-but-not-ready operation back to the tail of its
    /// priority queue. Bypasses the depth check: the operation was
    /// already admitted. On a closed pool the operation's slot is
    /// resolved with `Cancelled` instead, so nothing re-enters a queue
    /// that was already drained.
    pub(crate) fn requeue(&self, op: QueuedOperation) {
        let mut state = self.queues.lock();
        if state.closed {
            drop(state);
            let _ = op.slot.send(Err(SchedulerError::Cancelled));
            return;
        }
        state.queues[op.priority.queue_index()].push_back(op);
    }

    /// Close the pool to further submissions and remove every queued
    /// operation. Used during shutdown to resolve outstanding result
    /// slots.
    pub(crate) fn drain(&self) -> Vec<QueuedOperation> {
        let mut state = self.queues.lock();
        state.closed = true;
        let mut drained = Vec::new();
        for priority in Priority::DISPATCH_ORDER {
            drained.extend(state.queues[priority.queue_index()].drain(..));
        }
        drained
    }

    /// Total operations currently waiting across all priorities.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queues.lock().queues.iter().map(VecDeque::len).sum()
    }

    /// Acquire a concurrency slot for the operation's class, suspending
    /// the calling unit until one frees up.
    pub(crate) async fn acquire(
        &self,
        class: OperationClass,
    ) -> Result<ClassPermit, SchedulerError> {
        let limiter = LimiterClass::for_operation(class);
        let permit = Arc::clone(&self.limiters[limiter.index()])
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::Internal("limiter closed".into()))?;
        self.counters.running[limiter.index()].fetch_add(1, Ordering::AcqRel);
        let total: usize = self
            .counters
            .running
            .iter()
            .map(|g| g.load(Ordering::Acquire))
            .sum();
        self.counters.peak_running.fetch_max(total, Ordering::AcqRel);
        Ok(ClassPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
            limiter,
        })
    }

    /// Record an operation's terminal status in the lifetime totals.
    /// Only successful completions contribute to the cumulative
    /// execution time backing `average_execution_ms`.
    pub(crate) fn note_terminal(&self, status: OperationStatus, exec_ms: Option<u128>) {
        let counter = match status {
            OperationStatus::Completed => {
                if let Some(ms) = exec_ms {
                    let ms = u64::try_from(ms).unwrap_or(u64::MAX);
                    self.counters.total_exec_ms.fetch_add(ms, Ordering::AcqRel);
                }
                &self.counters.completed
            }
            OperationStatus::Failed => &self.counters.failed,
            OperationStatus::TimedOut => &self.counters.timed_out,
            OperationStatus::Cancelled => &self.counters.cancelled,
            OperationStatus::Pending | OperationStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Mean execution time of successfully completed operations.
    #[must_use]
    pub fn average_execution_ms(&self) -> f64 {
        let completed = self.counters.completed.load(Ordering::Acquire);
        if completed == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let total = self.counters.total_exec_ms.load(Ordering::Acquire) as f64;
        #[allow(clippy::cast_precision_loss)]
        let completed = completed as f64;
        total / completed
    }

    fn limiter_snapshot(&self, limiter: LimiterClass) -> LimiterSnapshot {
        let capacity = self.capacities.get(limiter);
        let running = self.counters.running[limiter.index()].load(Ordering::Acquire);
        #[allow(clippy::cast_precision_loss)]
        let utilization_pct = if capacity == 0 {
            0.0
        } else {
            running as f64 / capacity as f64 * 100.0
        };
        LimiterSnapshot {
            capacity,
            running,
            utilization_pct,
        }
    }

    /// Snapshot of limiter utilization, queue depth, and lifetime totals.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            read: self.limiter_snapshot(LimiterClass::Read),
            write: self.limiter_snapshot(LimiterClass::Write),
            transaction: self.limiter_snapshot(LimiterClass::Transaction),
            queued: self.queued_len(),
            peak_running: self.counters.peak_running.load(Ordering::Acquire),
            submitted: self.counters.submitted.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
            timed_out: self.counters.timed_out.load(Ordering::Acquire),
            cancelled: self.counters.cancelled.load(Ordering::Acquire),
            rejected: self.counters.rejected.load(Ordering::Acquire),
        }
    }
}
