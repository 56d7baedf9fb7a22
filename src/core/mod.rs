//! Core scheduling machinery: the resource pool, the dispatch loop, and
//! the types that flow between them.

pub mod background;
pub mod batch;
pub mod error;
pub mod operation;
pub mod resource_pool;
pub mod scheduler;

pub use self::background::BackgroundJob;
pub use self::batch::{BatchMember, BatchOptions, BatchRecord, BatchStrategy, BatchSummary};
pub use self::error::{AppResult, SchedulerError};
pub use self::operation::{
    OperationClass, OperationOptions, OperationRecord, OperationStatus, Priority,
};
pub use self::resource_pool::{ClassCapacities, LimiterSnapshot, PoolSnapshot};
pub use self::scheduler::{CompletionSummary, SchedulerSnapshot};
