//! # opsched
//!
//! Asynchronous operation scheduling and resource-pool management for
//! database-bound workloads.
//!
//! This library sits between application services and a shared resource
//! (typically a database connection pool) and arbitrates access to it.
//! Operations are classified (read, write, transaction, ...), queued by
//! priority, and dispatched under per-class concurrency limits so that a
//! burst of one traffic class cannot starve the others.
//!
//! ## Key Features
//!
//! - **Per-Class Concurrency Limits**: Independent caps for read, write,
//!   and transaction traffic.
//! - **Priority Dispatch**: Four priority levels with FIFO ordering
//!   inside each level.
//! - **Dependency Resolution**: Operations can declare ids of operations
//!   that must complete before they run.
//! - **Timeouts and Cancellation**: Every operation races a deadline;
//!   shutdown resolves everything still in flight.
//! - **Batch Strategies**: Parallel, sequential, and mixed execution for
//!   grouped operations with per-batch concurrency caps.
//! - **Background Tasks**: One-shot and periodic jobs with cooperative
//!   cancellation, including the built-in cleanup sweep that bounds
//!   record retention.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opsched::{ManagerConfig, OperationClass, OperationManager, OperationOptions};
//!
//! let manager = OperationManager::new(ManagerConfig::default())?;
//!
//! let value = manager
//!     .execute_async(
//!         async { Ok::<_, anyhow::Error>(42u32) },
//!         OperationOptions::new(OperationClass::Read),
//!     )
//!     .await?;
//!
//! manager.shutdown().await;
//! ```
//!
//! For complete examples, see `tests/manager_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling machinery: pool, dispatch loop, batches, background.
pub mod core;
/// Configuration model for the operation manager.
pub mod config;
/// The operation manager facade.
pub mod manager;
/// Shared utilities.
pub mod util;

pub use crate::config::ManagerConfig;
pub use crate::core::{
    AppResult, BackgroundJob, BatchMember, BatchOptions, BatchRecord, BatchStrategy,
    BatchSummary, ClassCapacities, CompletionSummary, LimiterSnapshot, OperationClass,
    OperationOptions, OperationRecord, OperationStatus, PoolSnapshot, Priority,
    SchedulerError, SchedulerSnapshot,
};
pub use crate::manager::{CleanupReport, ManagerStats, OperationHandle, OperationManager};
