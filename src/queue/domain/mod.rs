//! Domain model for the SIM provisioning task queue.
//!
//! Tasks describe deferred mutations against the upstream provider. The
//! domain owns their lifecycle rules, retry policy and derived progress
//! views, and stays free of persistence and transport concerns.

mod error;
mod ids;
mod progress;
mod retry;
mod task;
mod update;

pub use error::{ParseTaskStatusError, ParseTaskTypeError, TaskDomainError};
pub use ids::{BatchId, RequestId, TaskId, UserId};
pub use progress::{BatchProgress, QueueStats, StatusCounts};
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
pub use task::{
    BatchMembership, LabelField, NewQueueTask, PersistedTaskData, QueueTask, Requester,
    TaskPayload, TaskPriority, TaskStatus, TaskTarget, TaskType,
};
pub use update::{TaskUpdate, TransitionGuard};
