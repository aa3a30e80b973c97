//! Queue service: task creation, lookup, cancellation and maintenance.

use crate::queue::{
    domain::{
        BatchId, BatchMembership, BatchProgress, LabelField, NewQueueTask, QueueStats, QueueTask,
        RequestId, Requester, StatusCounts, TaskDomainError, TaskId, TaskPayload, TaskPriority,
        TaskStatus, TaskTarget, TaskUpdate, TransitionGuard, UserId,
    },
    ports::{AuditEvent, AuditSink, TaskRepository, TaskRepositoryError},
};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Attempt budget applied when a request does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Most tasks returned by [`QueueService::get_user_tasks`].
pub const USER_TASK_LIMIT: usize = 50;

/// Tunables applied by the queue service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Attempt budget for requests that do not set one.
    pub default_max_attempts: u32,
    /// Shortest retention accepted by [`QueueService::cleanup_old_tasks`].
    pub min_retention: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_retention: Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestedChange {
    Status {
        old_status: Option<String>,
        new_status: String,
        targets: Vec<String>,
    },
    Label {
        field: String,
        value: String,
    },
}

/// Request to enqueue one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTaskRequest {
    change: RequestedChange,
    msisdn: String,
    cli: String,
    priority: Option<u8>,
    max_attempts: Option<u32>,
    request_id: Option<RequestId>,
    requester: Requester,
}

impl CreateTaskRequest {
    fn new(change: RequestedChange, msisdn: impl Into<String>) -> Self {
        Self {
            change,
            msisdn: msisdn.into(),
            cli: String::new(),
            priority: None,
            max_attempts: None,
            request_id: None,
            requester: Requester::default(),
        }
    }

    /// Requests a status change of the SIM identified by `msisdn`.
    #[must_use]
    pub fn status_change(msisdn: impl Into<String>, new_status: impl Into<String>) -> Self {
        Self::new(
            RequestedChange::Status {
                old_status: None,
                new_status: new_status.into(),
                targets: Vec::new(),
            },
            msisdn,
        )
    }

    /// Requests a label update. `field` accepts `label_1` or
    /// `CUSTOMER_LABEL_1` style names.
    #[must_use]
    pub fn label_update(
        msisdn: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(
            RequestedChange::Label {
                field: field.into(),
                value: value.into(),
            },
            msisdn,
        )
    }

    /// Records the status the caller believes the SIM has.
    #[must_use]
    pub fn with_old_status(mut self, status: impl Into<String>) -> Self {
        if let RequestedChange::Status { old_status, .. } = &mut self.change {
            *old_status = Some(status.into());
        }
        self
    }

    /// Applies a status change to several SIMs in one provider call.
    #[must_use]
    pub fn with_targets(mut self, msisdns: impl IntoIterator<Item = String>) -> Self {
        if let RequestedChange::Status { targets, .. } = &mut self.change {
            *targets = msisdns.into_iter().collect();
        }
        self
    }

    /// Sets the secondary CLI identifier.
    #[must_use]
    pub fn with_cli(mut self, cli: impl Into<String>) -> Self {
        self.cli = cli.into();
        self
    }

    /// Sets the scheduling priority (1 to 10).
    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Uses a caller-supplied correlation identifier.
    #[must_use]
    pub const fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Records the requesting user.
    #[must_use]
    pub fn requested_by(mut self, user_id: UserId, username: impl Into<String>) -> Self {
        self.requester.user_id = Some(user_id);
        self.requester.username = username.into();
        self
    }

    /// Records the client IP address.
    #[must_use]
    pub fn from_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.requester.ip_address = ip_address.into();
        self
    }

    fn into_new_task(
        self,
        policy: &QueuePolicy,
        batch: Option<BatchMembership>,
        now: DateTime<Utc>,
    ) -> Result<NewQueueTask, TaskDomainError> {
        let Self {
            change,
            msisdn,
            cli,
            priority: requested_priority,
            max_attempts: requested_attempts,
            request_id,
            requester,
        } = self;

        let priority =
            requested_priority.map_or_else(|| Ok(TaskPriority::default()), TaskPriority::new)?;
        let max_attempts = requested_attempts.unwrap_or(policy.default_max_attempts);
        if max_attempts == 0 {
            return Err(TaskDomainError::InvalidMaxAttempts(max_attempts));
        }

        let (target, payload) = match change {
            RequestedChange::Status {
                old_status,
                new_status,
                targets,
            } => status_change_payload(msisdn, cli, old_status, &new_status, targets)?,
            RequestedChange::Label { field, value } => {
                let target = TaskTarget::new(msisdn, cli);
                if target.identifier().is_none() {
                    return Err(TaskDomainError::MissingTarget);
                }
                let label_field = LabelField::parse(&field)?;
                let length = value.chars().count();
                if length > LabelField::MAX_VALUE_LEN {
                    return Err(TaskDomainError::LabelTooLong(length));
                }
                let payload = TaskPayload::LabelUpdate {
                    field: label_field,
                    value,
                };
                (target, payload)
            }
        };

        Ok(NewQueueTask {
            request_id: request_id.unwrap_or_default(),
            batch,
            priority,
            payload,
            target,
            requester,
            max_attempts,
            next_run_at: now,
            created_at: now,
        })
    }
}

fn status_change_payload(
    msisdn: String,
    cli: String,
    old_status: Option<String>,
    new_status: &str,
    targets: Vec<String>,
) -> Result<(TaskTarget, TaskPayload), TaskDomainError> {
    let status = new_status.trim();
    if status.is_empty() {
        return Err(TaskDomainError::EmptyStatus);
    }
    let listed: Vec<String> = targets
        .into_iter()
        .map(|entry| entry.trim().to_owned())
        .filter(|entry| !entry.is_empty())
        .collect();
    let primary = if msisdn.trim().is_empty() {
        listed.first().cloned().unwrap_or_default()
    } else {
        msisdn
    };
    let target = TaskTarget::new(primary, cli);
    let identifier = target
        .identifier()
        .ok_or(TaskDomainError::MissingTarget)?
        .to_owned();
    let all_targets = if listed.is_empty() {
        vec![identifier]
    } else {
        listed
    };
    let payload = TaskPayload::StatusChange {
        old_status: old_status.filter(|value| !value.trim().is_empty()),
        new_status: status.to_owned(),
        targets: all_targets,
    };
    Ok((target, payload))
}

/// Identifiers assigned to a newly created batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCreated {
    /// Shared batch identifier.
    pub batch_id: BatchId,
    /// Task identifiers in batch order.
    pub task_ids: Vec<TaskId>,
}

/// Service-level errors for queue operations.
#[derive(Debug, Error)]
pub enum QueueServiceError {
    /// Request validation failed.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),

    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] TaskRepositoryError),

    /// No task has the identifier.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// No task has the correlation identifier.
    #[error("no task for request {0}")]
    RequestNotFound(RequestId),

    /// No task belongs to the batch.
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// The task is not pending or processing, or belongs to another user.
    #[error("task {id} cannot be cancelled from status {status}")]
    NotCancellable {
        /// Task identifier.
        id: TaskId,
        /// Status observed after the rejected update.
        status: TaskStatus,
    },

    /// Only failed tasks can be retried.
    #[error("task {id} cannot be retried from status {status}")]
    NotRetryable {
        /// Task identifier.
        id: TaskId,
        /// Status observed after the rejected update.
        status: TaskStatus,
    },

    /// The requested retention is shorter than the configured minimum.
    #[error("retention of {requested_days} days is below the minimum of {minimum_days} days")]
    RetentionTooShort {
        /// Requested retention in days.
        requested_days: i64,
        /// Minimum retention in days.
        minimum_days: i64,
    },
}

/// Result type for queue service operations.
pub type QueueServiceResult<T> = Result<T, QueueServiceError>;

/// Task queue orchestration service.
pub struct QueueService<R, C>
where
    R: TaskRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    audit: Arc<dyn AuditSink>,
    policy: QueuePolicy,
}

impl<R, C> QueueService<R, C>
where
    R: TaskRepository,
    C: Clock + Send + Sync,
{
    /// Creates a queue service with the default policy.
    #[must_use]
    pub fn new(repository: Arc<R>, clock: Arc<C>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repository,
            clock,
            audit,
            policy: QueuePolicy::default(),
        }
    }

    /// Replaces the service policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validates and enqueues one task. No provider call is made.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Domain`] for invalid requests and
    /// [`QueueServiceError::Repository`] when persistence fails.
    pub async fn create_task(&self, request: CreateTaskRequest) -> QueueServiceResult<QueueTask> {
        let now = self.clock.utc();
        let new_task = request.into_new_task(&self.policy, None, now)?;
        let task = self.repository.insert(new_task).await?;
        info!(
            task_id = %task.id(),
            request_id = %task.request_id(),
            task_type = %task.task_type(),
            msisdn = task.target().msisdn(),
            "task queued"
        );
        self.audit_queued(&task, now);
        Ok(task)
    }

    /// Validates every request, then enqueues them atomically under one
    /// batch identifier.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Domain`] when the batch is empty or any
    /// request is invalid, and [`QueueServiceError::Repository`] when
    /// persistence fails. No task is stored in either case.
    pub async fn create_batch(
        &self,
        requests: Vec<CreateTaskRequest>,
    ) -> QueueServiceResult<BatchCreated> {
        if requests.is_empty() {
            return Err(TaskDomainError::EmptyBatch.into());
        }
        let total = u32::try_from(requests.len())
            .map_err(|_| TaskDomainError::BatchTooLarge(requests.len()))?;
        let now = self.clock.utc();
        let batch_id = BatchId::new();
        let new_tasks = (1..=total)
            .zip(requests)
            .map(|(index, request)| {
                let member = BatchMembership {
                    batch_id,
                    index,
                    total,
                };
                request.into_new_task(&self.policy, Some(member), now)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tasks = self.repository.insert_batch(new_tasks).await?;
        info!(batch_id = %batch_id, total, "batch queued");
        for task in &tasks {
            self.audit_queued(task, now);
        }
        Ok(BatchCreated {
            batch_id,
            task_ids: tasks.iter().map(QueueTask::id).collect(),
        })
    }

    /// Returns a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::NotFound`] when no task matches.
    pub async fn get_task_by_id(&self, id: TaskId) -> QueueServiceResult<QueueTask> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(QueueServiceError::NotFound(id))
    }

    /// Returns a task by correlation identifier.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::RequestNotFound`] when no task matches.
    pub async fn get_task_by_request_id(
        &self,
        request_id: RequestId,
    ) -> QueueServiceResult<QueueTask> {
        self.repository
            .find_by_request_id(request_id)
            .await?
            .ok_or(QueueServiceError::RequestNotFound(request_id))
    }

    /// Returns a user's most recent tasks, newest first.
    ///
    /// An empty `statuses` slice matches every status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Repository`] when the lookup fails.
    pub async fn get_user_tasks(
        &self,
        user: UserId,
        statuses: &[TaskStatus],
    ) -> QueueServiceResult<Vec<QueueTask>> {
        Ok(self
            .repository
            .find_by_user(user, statuses, USER_TASK_LIMIT)
            .await?)
    }

    /// Returns a batch's tasks in batch order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Repository`] when the lookup fails.
    pub async fn get_batch_tasks(&self, batch: BatchId) -> QueueServiceResult<Vec<QueueTask>> {
        Ok(self.repository.find_by_batch(batch).await?)
    }

    /// Returns due pending tasks in processing order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Repository`] when the lookup fails.
    pub async fn get_pending_tasks(&self, limit: usize) -> QueueServiceResult<Vec<QueueTask>> {
        Ok(self.repository.find_due(self.clock.utc(), limit).await?)
    }

    /// Summarises a batch's progress.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::BatchNotFound`] when no task belongs to
    /// the batch.
    pub async fn get_batch_progress(&self, batch: BatchId) -> QueueServiceResult<BatchProgress> {
        let tasks = self.repository.find_by_batch(batch).await?;
        if tasks.is_empty() {
            return Err(QueueServiceError::BatchNotFound(batch));
        }
        let counts: StatusCounts = tasks.iter().map(QueueTask::status).collect();
        Ok(BatchProgress::from_counts(batch, &counts))
    }

    /// Cancels a pending or processing task owned by `user`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::NotFound`] for unknown tasks and
    /// [`QueueServiceError::NotCancellable`] when the task is terminal or
    /// owned by someone else. The task is unchanged in both cases.
    pub async fn cancel_task(&self, id: TaskId, user: UserId) -> QueueServiceResult<QueueTask> {
        let guard = TransitionGuard::entering(TaskStatus::Cancelled).owned_by(user);
        self.cancel_guarded(id, &guard, &user.to_string()).await
    }

    /// Cancels a pending or processing task regardless of its owner.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::NotFound`] for unknown tasks and
    /// [`QueueServiceError::NotCancellable`] when the task is terminal.
    pub async fn cancel_task_admin(
        &self,
        id: TaskId,
        actor: &str,
    ) -> QueueServiceResult<QueueTask> {
        let guard = TransitionGuard::entering(TaskStatus::Cancelled);
        self.cancel_guarded(id, &guard, actor).await
    }

    async fn cancel_guarded(
        &self,
        id: TaskId,
        guard: &TransitionGuard,
        actor: &str,
    ) -> QueueServiceResult<QueueTask> {
        let now = self.clock.utc();
        let cancelled = self
            .repository
            .transition(id, guard, &TaskUpdate::cancel(now))
            .await?;
        let task = self.get_task_by_id(id).await?;
        if !cancelled {
            return Err(QueueServiceError::NotCancellable {
                id,
                status: task.status(),
            });
        }
        info!(task_id = %id, actor, "task cancelled");
        self.audit.record(AuditEvent::cancelled(
            id,
            task.target().msisdn(),
            actor,
            now,
        ));
        Ok(task)
    }

    /// Requeues a failed task with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::NotFound`] for unknown tasks and
    /// [`QueueServiceError::NotRetryable`] unless the task is failed.
    pub async fn retry_task(&self, id: TaskId, actor: &str) -> QueueServiceResult<QueueTask> {
        let now = self.clock.utc();
        let requeued = self
            .repository
            .transition(
                id,
                &TransitionGuard::from_status(TaskStatus::Failed),
                &TaskUpdate::requeue(now),
            )
            .await?;
        let task = self.get_task_by_id(id).await?;
        if !requeued {
            return Err(QueueServiceError::NotRetryable {
                id,
                status: task.status(),
            });
        }
        info!(task_id = %id, actor, "failed task requeued");
        self.audit
            .record(AuditEvent::requeued(id, task.target().msisdn(), actor, now));
        Ok(task)
    }

    /// Returns counts by status and the number of tasks created today (UTC).
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Repository`] when a count fails.
    pub async fn get_stats(&self) -> QueueServiceResult<QueueStats> {
        let start_of_day = self
            .clock
            .utc()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        let counts = self.repository.count_by_status().await?;
        let created_today = self.repository.count_created_since(start_of_day).await?;
        Ok(QueueStats {
            counts,
            created_today,
        })
    }

    /// Deletes terminal tasks completed more than `older_than` ago.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::RetentionTooShort`] when `older_than` is
    /// below the policy minimum.
    pub async fn cleanup_old_tasks(&self, older_than: Duration) -> QueueServiceResult<u64> {
        if older_than < self.policy.min_retention {
            return Err(QueueServiceError::RetentionTooShort {
                requested_days: older_than.num_days(),
                minimum_days: self.policy.min_retention.num_days(),
            });
        }
        let cutoff = self
            .clock
            .utc()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.repository.delete_terminal_before(cutoff).await?;
        debug!(%cutoff, deleted, "old tasks cleaned up");
        Ok(deleted)
    }

    fn audit_queued(&self, task: &QueueTask, now: DateTime<Utc>) {
        self.audit.record(AuditEvent::queued(
            task.id(),
            task.target().msisdn(),
            &task.requester().username,
            now,
        ));
    }
}
