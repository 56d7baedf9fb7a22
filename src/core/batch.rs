//! Batch execution types: strategies, members, and aggregated outcomes.
//!
//! The strategies themselves are driven by the operation manager, which
//! submits every member through the normal scheduling path.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use uuid::Uuid;

use crate::core::operation::{OperationClass, Priority};
use crate::core::SchedulerError;

/// How the members of a batch are executed relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// All members scheduled concurrently, bounded by the batch's own
    /// concurrency cap. Member failures never abort siblings.
    Parallel,
    /// Members run strictly one after another in submission order.
    Sequential,
    /// Read-class members run under the parallel policy; everything else
    /// runs sequentially afterwards. Read results precede write results.
    Mixed,
}

/// Caller-supplied options for one `execute_batch` call.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Execution strategy.
    pub strategy: BatchStrategy,
    /// Concurrency cap for the parallel strategy (and the parallel phase
    /// of the mixed strategy). Distinct from the pool's class limiters.
    pub max_concurrency: usize,
    /// Per-member timeout override.
    pub timeout: Option<Duration>,
    /// Sequential strategy only: stop starting members after the first
    /// failure.
    pub stop_on_error: bool,
}

impl BatchOptions {
    /// Options for the given strategy with a concurrency cap of 4 and no
    /// early stop.
    #[must_use]
    pub const fn new(strategy: BatchStrategy) -> Self {
        Self {
            strategy,
            max_concurrency: 4,
            timeout: None,
            stop_on_error: false,
        }
    }

    /// Set the parallel concurrency cap.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Override the per-member timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Halt a sequential batch at the first member failure.
    #[must_use]
    pub const fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }
}

/// One unit of work inside a batch.
pub struct BatchMember<T> {
    /// Operation class; decides the concurrency limiter and, under the
    /// mixed strategy, whether the member joins the parallel read phase.
    pub class: OperationClass,
    /// Queue priority for this member.
    pub priority: Priority,
    pub(crate) work: BoxFuture<'static, Result<T, anyhow::Error>>,
}

impl<T: Send + 'static> BatchMember<T> {
    /// Wrap a work future as a batch member at normal priority.
    pub fn new<F>(class: OperationClass, work: F) -> Self
    where
        F: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    {
        Self {
            class,
            priority: Priority::Normal,
            work: work.boxed(),
        }
    }

    /// Set the member's queue priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl<T> std::fmt::Debug for BatchMember<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchMember")
            .field("class", &self.class)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Aggregated outcome of one batch, returned to the caller.
///
/// Member errors are captured here, never raised out of `execute_batch`;
/// callers must inspect `failure_count` and `errors`.
#[derive(Debug)]
pub struct BatchRecord<T> {
    /// Batch id.
    pub id: Uuid,
    /// Strategy the batch ran under.
    pub strategy: BatchStrategy,
    /// Operation ids of the members that were admitted to the scheduler,
    /// in submission order. Rejected members never received an id.
    pub member_ids: Vec<Uuid>,
    /// Successful member results, in aggregation order.
    pub results: Vec<T>,
    /// Captured member errors, in aggregation order.
    pub errors: Vec<SchedulerError>,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at_ms: u128,
    /// Completion timestamp.
    pub completed_at_ms: u128,
}

impl<T> BatchRecord<T> {
    /// Number of members that completed successfully.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.len()
    }

    /// Number of members that failed, were rejected at submission, or
    /// were never started by a halted sequential batch.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }

    /// Type-free summary for registry retention and status lookups.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            id: self.id,
            strategy: self.strategy,
            member_count: self.results.len() + self.errors.len(),
            success_count: self.success_count(),
            failure_count: self.failure_count(),
            created_at_ms: self.created_at_ms,
            completed_at_ms: self.completed_at_ms,
        }
    }
}

/// Retained, serializable view of a finished batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Batch id.
    pub id: Uuid,
    /// Strategy the batch ran under.
    pub strategy: BatchStrategy,
    /// Total members.
    pub member_count: usize,
    /// Members that completed successfully.
    pub success_count: usize,
    /// Members that failed or were never started.
    pub failure_count: usize,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at_ms: u128,
    /// Completion timestamp.
    pub completed_at_ms: u128,
}
