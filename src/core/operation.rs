//! Operation records, classification enums, and payload type erasure.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::core::SchedulerError;

/// Priority used for queue ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest priority, dispatched last.
    Low,
    /// Default priority.
    Normal,
    /// Dispatched before normal traffic.
    High,
    /// Dispatched before everything else.
    Critical,
}

impl Priority {
    /// All priorities from most to least urgent, the order the dispatch
    /// loop scans wait queues in.
    pub const DISPATCH_ORDER: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Index of this priority's wait queue.
    #[must_use]
    pub const fn queue_index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

/// Classification of an operation, used to pick its concurrency limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Read-only database work.
    Read,
    /// Mutating database work.
    Write,
    /// A member of a coordinated batch.
    BatchMember,
    /// Transactional work holding a connection for its duration.
    Transaction,
    /// Housekeeping work outside the request path.
    Background,
}

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Queued, waiting for dispatch.
    Pending,
    /// Dispatched and executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Payload raised an application error.
    Failed,
    /// Cancelled by the caller or by shutdown.
    Cancelled,
    /// Lost the race against its timeout.
    TimedOut,
}

impl OperationStatus {
    /// Whether this status is terminal. Terminal statuses never change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Whether this status is terminal and successful.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Caller-supplied options for a single operation submission.
#[derive(Debug, Clone)]
pub struct OperationOptions {
    /// Operation class, mapped to a concurrency limiter at dispatch.
    pub class: OperationClass,
    /// Queue ordering priority.
    pub priority: Priority,
    /// Timeout override; falls back to the manager-wide default.
    pub timeout: Option<Duration>,
    /// Ids of operations that must complete before this one runs.
    pub dependencies: Vec<Uuid>,
}

impl OperationOptions {
    /// Options for the given class at normal priority with defaults.
    #[must_use]
    pub const fn new(class: OperationClass) -> Self {
        Self {
            class,
            priority: Priority::Normal,
            timeout: None,
            dependencies: Vec::new(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the manager-wide default timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declare dependency operation ids.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Observable record of one scheduled operation.
///
/// Records are created at submission, mutated only by the scheduler while
/// the operation executes, and pruned by the cleanup sweep once terminal
/// and older than the retention window.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    /// Unique id generated at submission.
    pub id: Uuid,
    /// Operation class.
    pub class: OperationClass,
    /// Queue priority.
    pub priority: Priority,
    /// Current lifecycle status.
    pub status: OperationStatus,
    /// Submission timestamp, milliseconds since epoch.
    pub created_at_ms: u128,
    /// Execution start timestamp.
    pub started_at_ms: Option<u128>,
    /// Terminal timestamp.
    pub completed_at_ms: Option<u128>,
    /// Effective timeout applied at execution.
    pub timeout: Duration,
    /// Declared dependency ids.
    pub dependencies: Vec<Uuid>,
    /// Captured error text for failed/timed-out/cancelled operations.
    pub error: Option<String>,
}

impl OperationRecord {
    /// Execution duration in milliseconds, if the operation started and
    /// reached a terminal state.
    #[must_use]
    pub fn execution_ms(&self) -> Option<u128> {
        match (self.started_at_ms, self.completed_at_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// Type-erased successful payload output.
pub(crate) type ErasedValue = Box<dyn Any + Send>;

/// Outcome delivered through an operation's result slot.
pub(crate) type ErasedOutcome = Result<ErasedValue, SchedulerError>;

/// Type-erased payload future. The scheduler treats payloads as opaque:
/// it only awaits them and observes success or error.
pub(crate) type ErasedFuture =
    Pin<Box<dyn Future<Output = Result<ErasedValue, anyhow::Error>> + Send>>;

/// An operation waiting in the resource pool, carrying its payload and
/// single-assignment result slot.
pub(crate) struct QueuedOperation {
    pub id: Uuid,
    pub class: OperationClass,
    pub priority: Priority,
    pub timeout: Duration,
    pub dependencies: Vec<Uuid>,
    pub payload: ErasedFuture,
    pub slot: oneshot::Sender<ErasedOutcome>,
}

impl QueuedOperation {
    /// Erase a typed work future into a queued operation plus the
    /// receiving half of its result slot.
    pub(crate) fn erase<F, T>(
        id: Uuid,
        opts: &OperationOptions,
        timeout: Duration,
        work: F,
    ) -> (Self, oneshot::Receiver<ErasedOutcome>)
    where
        F: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let payload: ErasedFuture = Box::pin(async move {
            work.await.map(|value| Box::new(value) as ErasedValue)
        });
        (
            Self {
                id,
                class: opts.class,
                priority: opts.priority,
                timeout,
                dependencies: opts.dependencies.clone(),
                payload,
                slot: tx,
            },
            rx,
        )
    }
}

impl std::fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
