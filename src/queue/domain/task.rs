//! Queued task aggregate and its classification types.

use super::{
    BatchId, ParseTaskStatusError, ParseTaskTypeError, RequestId, TaskDomainError, TaskId,
    TaskUpdate, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for the worker, possibly until a retry time.
    Pending,
    /// Claimed by the worker; a provider call may be in flight.
    Processing,
    /// Finished, either successfully or skipped as unrecoverable.
    Completed,
    /// Attempts exhausted.
    Failed,
    /// Cancelled by a user or administrator.
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses eligible for retention cleanup.
    pub const TERMINAL: [Self; 3] = [Self::Completed, Self::Failed, Self::Cancelled];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` when no further worker transitions apply.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns whether the lifecycle permits moving to `target`.
    ///
    /// Processing may return to pending when a retry is scheduled. The
    /// administrative requeue of failed tasks is modelled separately by
    /// [`TaskUpdate::requeue`].
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing | Self::Failed | Self::Cancelled)
                | (
                    Self::Processing,
                    Self::Pending | Self::Completed | Self::Failed | Self::Cancelled
                )
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Change the provisioning status of one or more SIMs.
    StatusChange,
    /// Update one customer label of a SIM.
    LabelUpdate,
    /// Refresh the local mirror from the provider after a write.
    Reconcile,
}

impl TaskType {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::LabelUpdate => "label_update",
            Self::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskType {
    type Error = ParseTaskTypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "status_change" => Ok(Self::StatusChange),
            "label_update" => Ok(Self::LabelUpdate),
            "reconcile" => Ok(Self::Reconcile),
            _ => Err(ParseTaskTypeError(value.to_owned())),
        }
    }
}

/// Scheduling priority; lower values are serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPriority(u8);

impl TaskPriority {
    /// Critical operations.
    pub const URGENT: Self = Self(1);
    /// User-initiated actions.
    pub const HIGH: Self = Self(3);
    /// Regular operations.
    pub const NORMAL: Self = Self(5);
    /// Background work.
    pub const LOW: Self = Self(7);
    /// Synchronisation with the provider.
    pub const BACKGROUND: Self = Self(10);

    /// Creates a validated priority.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidPriority`] when the value is outside
    /// `1..=10`.
    pub const fn new(value: u8) -> Result<Self, TaskDomainError> {
        if value == 0 || value > Self::BACKGROUND.0 {
            return Err(TaskDomainError::InvalidPriority(value));
        }
        Ok(Self(value))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::HIGH
    }
}

/// Customer label slot on a SIM record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelField {
    /// First customer label.
    #[serde(rename = "label_1")]
    Label1,
    /// Second customer label.
    #[serde(rename = "label_2")]
    Label2,
    /// Third customer label.
    #[serde(rename = "label_3")]
    Label3,
}

impl LabelField {
    /// Longest label value the provider and the mirror accept.
    pub const MAX_VALUE_LEN: usize = 200;

    /// Parses a label field from either its internal key or the display
    /// name used by the provider portal.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::UnknownLabelField`] for any other name.
    pub fn parse(value: &str) -> Result<Self, TaskDomainError> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "label_1" | "label1" | "customer_label_1" => Ok(Self::Label1),
            "label_2" | "label2" | "customer_label_2" => Ok(Self::Label2),
            "label_3" | "label3" | "customer_label_3" => Ok(Self::Label3),
            _ => Err(TaskDomainError::UnknownLabelField(value.to_owned())),
        }
    }

    /// Returns the internal field key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Label1 => "label_1",
            Self::Label2 => "label_2",
            Self::Label3 => "label_3",
        }
    }
}

impl fmt::Display for LabelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific task data, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Bulk status change.
    StatusChange {
        /// Status the caller believed the SIM had, if known.
        old_status: Option<String>,
        /// Requested status.
        new_status: String,
        /// Every MSISDN the change applies to.
        targets: Vec<String>,
    },
    /// Single label update.
    LabelUpdate {
        /// Label slot to write.
        field: LabelField,
        /// New label value.
        value: String,
    },
    /// Deferred mirror refresh.
    Reconcile {
        /// MSISDNs to re-read from the provider.
        targets: Vec<String>,
    },
}

impl TaskPayload {
    /// Returns the task type this payload belongs to.
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        match self {
            Self::StatusChange { .. } => TaskType::StatusChange,
            Self::LabelUpdate { .. } => TaskType::LabelUpdate,
            Self::Reconcile { .. } => TaskType::Reconcile,
        }
    }
}

/// SIM identifiers the task operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTarget {
    msisdn: String,
    cli: String,
}

impl TaskTarget {
    /// Creates a target from trimmed identifiers; blank values are kept
    /// empty.
    #[must_use]
    pub fn new(msisdn: impl Into<String>, cli: impl Into<String>) -> Self {
        Self {
            msisdn: msisdn.into().trim().to_owned(),
            cli: cli.into().trim().to_owned(),
        }
    }

    /// Returns the MSISDN, which may be empty.
    #[must_use]
    pub fn msisdn(&self) -> &str {
        &self.msisdn
    }

    /// Returns the CLI, which may be empty.
    #[must_use]
    pub fn cli(&self) -> &str {
        &self.cli
    }

    /// Returns the identifier sent to the provider: the MSISDN when present,
    /// otherwise the CLI.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        [self.msisdn.as_str(), self.cli.as_str()]
            .into_iter()
            .find(|value| !value.is_empty())
    }
}

/// Who asked for the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Creating user, absent for system-created tasks.
    pub user_id: Option<UserId>,
    /// Username copied for display.
    pub username: String,
    /// Client IP address.
    pub ip_address: String,
}

impl Requester {
    /// Username recorded for tasks the queue creates on its own.
    pub const SYSTEM: &'static str = "system";

    /// Returns the requester used for internally scheduled tasks.
    #[must_use]
    pub fn system() -> Self {
        Self {
            user_id: None,
            username: Self::SYSTEM.to_owned(),
            ip_address: String::new(),
        }
    }
}

/// Position of a task within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMembership {
    /// Shared batch identifier.
    pub batch_id: BatchId,
    /// One-based index within the batch.
    pub index: u32,
    /// Number of tasks in the batch.
    pub total: u32,
}

/// A validated task ready to be inserted; the store assigns its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueTask {
    /// Correlation identifier.
    pub request_id: RequestId,
    /// Batch position, if part of a batch.
    pub batch: Option<BatchMembership>,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Type-specific data.
    pub payload: TaskPayload,
    /// SIM identifiers.
    pub target: TaskTarget,
    /// Creating user.
    pub requester: Requester,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Earliest time the worker may run the task.
    pub next_run_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl NewQueueTask {
    /// Builds a background reconciliation task for `targets`, due at
    /// `run_at`.
    #[must_use]
    pub fn reconcile(
        targets: Vec<String>,
        max_attempts: u32,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let target = TaskTarget::new(targets.first().cloned().unwrap_or_default(), "");
        Self {
            request_id: RequestId::new(),
            batch: None,
            priority: TaskPriority::BACKGROUND,
            payload: TaskPayload::Reconcile { targets },
            target,
            requester: Requester::system(),
            max_attempts,
            next_run_at: run_at,
            created_at: now,
        }
    }
}

/// Parameter object for reconstructing a persisted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Store-assigned identifier.
    pub id: TaskId,
    /// Correlation identifier.
    pub request_id: RequestId,
    /// Batch position, if any.
    pub batch: Option<BatchMembership>,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Type-specific data.
    pub payload: TaskPayload,
    /// SIM identifiers.
    pub target: TaskTarget,
    /// Creating user.
    pub requester: Requester,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Attempts consumed so far.
    pub attempt: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Earliest time the worker may run the task.
    pub next_run_at: DateTime<Utc>,
    /// Most recent error message.
    pub last_error: Option<String>,
    /// Result or explanation text.
    pub result: Option<String>,
    /// Provider-side request identifier.
    pub provider_request_id: Option<i64>,
    /// When the latest attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Duration of the latest attempt in milliseconds.
    pub duration_ms: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Task aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTask {
    id: TaskId,
    request_id: RequestId,
    batch: Option<BatchMembership>,
    priority: TaskPriority,
    payload: TaskPayload,
    target: TaskTarget,
    requester: Requester,
    status: TaskStatus,
    attempt: u32,
    max_attempts: u32,
    next_run_at: DateTime<Utc>,
    last_error: Option<String>,
    result: Option<String>,
    provider_request_id: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QueueTask {
    /// Materialises a freshly inserted task under its assigned identifier.
    #[must_use]
    pub fn from_new(id: TaskId, task: NewQueueTask) -> Self {
        Self {
            id,
            request_id: task.request_id,
            batch: task.batch,
            priority: task.priority,
            payload: task.payload,
            target: task.target,
            requester: task.requester,
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts: task.max_attempts,
            next_run_at: task.next_run_at,
            last_error: None,
            result: None,
            provider_request_id: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            created_at: task.created_at,
            updated_at: task.created_at,
        }
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            request_id: data.request_id,
            batch: data.batch,
            priority: data.priority,
            payload: data.payload,
            target: data.target,
            requester: data.requester,
            status: data.status,
            attempt: data.attempt,
            max_attempts: data.max_attempts,
            next_run_at: data.next_run_at,
            last_error: data.last_error,
            result: data.result,
            provider_request_id: data.provider_request_id,
            started_at: data.started_at,
            completed_at: data.completed_at,
            duration_ms: data.duration_ms,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the correlation identifier.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the batch position, if any.
    #[must_use]
    pub const fn batch(&self) -> Option<&BatchMembership> {
        self.batch.as_ref()
    }

    /// Returns the scheduling priority.
    #[must_use]
    pub const fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Returns the task type.
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }

    /// Returns the type-specific payload.
    #[must_use]
    pub const fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// Returns the SIM identifiers.
    #[must_use]
    pub const fn target(&self) -> &TaskTarget {
        &self.target
    }

    /// Returns the creating user.
    #[must_use]
    pub const fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the number of attempts consumed.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the earliest time the worker may run the task.
    #[must_use]
    pub const fn next_run_at(&self) -> DateTime<Utc> {
        self.next_run_at
    }

    /// Returns the most recent error message.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns the result or explanation text.
    #[must_use]
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Returns the provider-side request identifier.
    #[must_use]
    pub const fn provider_request_id(&self) -> Option<i64> {
        self.provider_request_id
    }

    /// Returns when the latest attempt started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the task reached a terminal status.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the duration of the latest attempt in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> Option<i64> {
        self.duration_ms
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last modification timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns `true` once no attempts remain.
    #[must_use]
    pub const fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Returns `true` when the task is pending and its run time has passed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_run_at <= now
    }

    /// Applies a state write produced by the queue or the worker.
    pub fn apply(&mut self, update: &TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(attempt) = update.attempt {
            self.attempt = attempt;
        }
        if let Some(next_run_at) = update.next_run_at {
            self.next_run_at = next_run_at;
        }
        if let Some(last_error) = &update.last_error {
            self.last_error.clone_from(last_error);
        }
        if let Some(result) = &update.result {
            self.result.clone_from(result);
        }
        if let Some(provider_request_id) = update.provider_request_id {
            self.provider_request_id = Some(provider_request_id);
        }
        if let Some(started_at) = update.started_at {
            self.started_at = started_at;
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(duration_ms) = update.duration_ms {
            self.duration_ms = duration_ms;
        }
        self.updated_at = update.updated_at;
    }
}
