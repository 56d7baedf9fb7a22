//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Submission rejected because the wait queues are at capacity.
    /// Returned synchronously; the operation never enters the scheduler.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The payload did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
    /// The operation was cancelled by the caller or by shutdown.
    #[error("operation cancelled")]
    Cancelled,
    /// A declared dependency reached a failed terminal state, so the
    /// dependent operation can never become ready.
    #[error("dependency {0} failed")]
    DependencyFailed(Uuid),
    /// The payload raised an application error; preserved and re-raised.
    #[error(transparent)]
    Payload(#[from] anyhow::Error),
    /// The manager is shutting down or already shut down.
    #[error("scheduler shut down")]
    Shutdown,
    /// Internal failure (broken result channel, closed limiter).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Whether this error represents a rejection at submission time,
    /// before the operation entered the scheduler.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::QueueFull(_) | Self::Shutdown)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_texts() {
        assert_eq!(
            SchedulerError::QueueFull("depth 4".into()).to_string(),
            "queue full: depth 4"
        );
        assert_eq!(SchedulerError::Cancelled.to_string(), "operation cancelled");
        assert_eq!(SchedulerError::Shutdown.to_string(), "scheduler shut down");
        let err = SchedulerError::TimedOut(Duration::from_millis(50));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn payload_error_is_transparent() {
        let inner = anyhow::anyhow!("duplicate key");
        let err = SchedulerError::from(inner);
        assert_eq!(err.to_string(), "duplicate key");
    }

    #[test]
    fn rejection_classification() {
        assert!(SchedulerError::QueueFull("full".into()).is_rejection());
        assert!(SchedulerError::Shutdown.is_rejection());
        assert!(!SchedulerError::Cancelled.is_rejection());
    }
}
