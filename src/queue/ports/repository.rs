//! Repository port for queued task persistence.

use crate::queue::domain::{
    BatchId, NewQueueTask, QueueTask, RequestId, StatusCounts, TaskId, TaskStatus, TaskUpdate,
    TransitionGuard, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for task repository operations.
pub type TaskRepositoryResult<T> = Result<T, TaskRepositoryError>;

/// Task store contract.
///
/// The store is the single source of truth for task state. All writes after
/// insertion go through [`TaskRepository::transition`], which applies the
/// update only when the stored row satisfies the guard.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a new task and returns it with its assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::DuplicateRequestId`] when the
    /// correlation identifier is already in use.
    async fn insert(&self, task: NewQueueTask) -> TaskRepositoryResult<QueueTask>;

    /// Inserts every task or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::DuplicateRequestId`] when any
    /// correlation identifier is already in use; no rows are written.
    async fn insert_batch(&self, tasks: Vec<NewQueueTask>) -> TaskRepositoryResult<Vec<QueueTask>>;

    /// Finds a task by identifier.
    async fn find_by_id(&self, id: TaskId) -> TaskRepositoryResult<Option<QueueTask>>;

    /// Finds a task by correlation identifier.
    async fn find_by_request_id(
        &self,
        request_id: RequestId,
    ) -> TaskRepositoryResult<Option<QueueTask>>;

    /// Returns a user's tasks, newest first.
    ///
    /// An empty `statuses` slice matches every status.
    async fn find_by_user(
        &self,
        user: UserId,
        statuses: &[TaskStatus],
        limit: usize,
    ) -> TaskRepositoryResult<Vec<QueueTask>>;

    /// Returns a batch's tasks ordered by batch index.
    async fn find_by_batch(&self, batch: BatchId) -> TaskRepositoryResult<Vec<QueueTask>>;

    /// Returns pending tasks due at `now`, by priority then creation time.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskRepositoryResult<Vec<QueueTask>>;

    /// Applies `update` when the stored row matches `guard`.
    ///
    /// Returns `false` when the task does not exist or the guard did not
    /// match; the row is unchanged in that case.
    async fn transition(
        &self,
        id: TaskId,
        guard: &TransitionGuard,
        update: &TaskUpdate,
    ) -> TaskRepositoryResult<bool>;

    /// Returns every processing task to pending and reports how many moved.
    async fn recover_processing(&self, now: DateTime<Utc>) -> TaskRepositoryResult<u64>;

    /// Fails pending tasks whose attempts are exhausted, recording `message`
    /// as the error, and reports how many moved.
    async fn fail_exhausted(&self, now: DateTime<Utc>, message: &str) -> TaskRepositoryResult<u64>;

    /// Counts tasks by status.
    async fn count_by_status(&self) -> TaskRepositoryResult<StatusCounts>;

    /// Counts tasks created at or after `since`.
    async fn count_created_since(&self, since: DateTime<Utc>) -> TaskRepositoryResult<u64>;

    /// Deletes terminal tasks completed before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> TaskRepositoryResult<u64>;
}

/// Errors returned by task repository implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskRepositoryError {
    /// A task with the same correlation identifier already exists.
    #[error("duplicate request identifier: {0}")]
    DuplicateRequestId(RequestId),

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
