//! State writes applied to queued tasks.
//!
//! Every mutation after insertion is expressed as a [`TaskUpdate`] guarded by
//! a [`TransitionGuard`]. Stores apply the update only when the row still
//! matches the guard, which makes claims, completions and cancellations
//! row-scoped compare-and-set operations.

use super::{TaskStatus, UserId};
use chrono::{DateTime, Utc};

/// Prefix recorded in `result` while a retry is scheduled.
pub(crate) const RETRYING_PREFIX: &str = "RETRYING: ";

/// Prefix recorded in `result` when a fatal error completes a task.
pub(crate) const SKIPPED_PREFIX: &str = "SKIPPED: ";

/// Partial task write. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    /// New lifecycle status.
    pub status: Option<TaskStatus>,
    /// New attempt counter.
    pub attempt: Option<u32>,
    /// New earliest run time.
    pub next_run_at: Option<DateTime<Utc>>,
    /// New error text; `Some(None)` clears it.
    pub last_error: Option<Option<String>>,
    /// New result text; `Some(None)` clears it.
    pub result: Option<Option<String>>,
    /// Start of the current attempt; `Some(None)` clears it.
    pub started_at: Option<Option<DateTime<Utc>>>,
    /// Completion time; `Some(None)` clears it.
    pub completed_at: Option<Option<DateTime<Utc>>>,
    /// Duration of the attempt in milliseconds; `Some(None)` clears it.
    pub duration_ms: Option<Option<i64>>,
    /// Provider-side request identifier.
    pub provider_request_id: Option<i64>,
    /// Modification timestamp, always written.
    pub updated_at: DateTime<Utc>,
}

impl TaskUpdate {
    /// Base write touching only `updated_at`.
    ///
    /// Const constructors list every field; spreading this value needs a
    /// destructor, which const contexts reject.
    const fn touch(now: DateTime<Utc>) -> Self {
        Self {
            status: None,
            attempt: None,
            next_run_at: None,
            last_error: None,
            result: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            provider_request_id: None,
            updated_at: now,
        }
    }

    /// Pending to processing, stamping the attempt start.
    #[must_use]
    pub const fn claim(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Processing),
            attempt: None,
            next_run_at: None,
            last_error: None,
            result: None,
            started_at: Some(Some(now)),
            completed_at: None,
            duration_ms: None,
            provider_request_id: None,
            updated_at: now,
        }
    }

    /// Successful completion.
    #[must_use]
    pub fn complete(
        result: impl Into<String>,
        provider_request_id: Option<i64>,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            result: Some(Some(result.into())),
            provider_request_id,
            duration_ms: Some(Some(duration_ms)),
            completed_at: Some(Some(now)),
            ..Self::touch(now)
        }
    }

    /// Completion of a task whose error can never succeed on retry.
    #[must_use]
    pub fn skip(
        explanation: &str,
        error: impl Into<String>,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            result: Some(Some(format!("{SKIPPED_PREFIX}{explanation}"))),
            last_error: Some(Some(error.into())),
            duration_ms: Some(Some(duration_ms)),
            completed_at: Some(Some(now)),
            ..Self::touch(now)
        }
    }

    /// Back to pending with a later run time.
    #[must_use]
    pub fn schedule_retry(
        attempt: u32,
        next_run_at: DateTime<Utc>,
        error: &str,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            attempt: Some(attempt),
            next_run_at: Some(next_run_at),
            last_error: Some(Some(error.to_owned())),
            result: Some(Some(format!("{RETRYING_PREFIX}{error}"))),
            duration_ms: Some(Some(duration_ms)),
            ..Self::touch(now)
        }
    }

    /// Terminal failure.
    #[must_use]
    pub fn fail(error: impl Into<String>, duration_ms: Option<i64>, now: DateTime<Utc>) -> Self {
        let message: String = error.into();
        Self {
            status: Some(TaskStatus::Failed),
            result: Some(Some(message.clone())),
            last_error: Some(Some(message)),
            duration_ms: duration_ms.map(Some),
            completed_at: Some(Some(now)),
            ..Self::touch(now)
        }
    }

    /// External cancellation.
    #[must_use]
    pub const fn cancel(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Cancelled),
            attempt: None,
            next_run_at: None,
            last_error: None,
            result: None,
            started_at: None,
            completed_at: Some(Some(now)),
            duration_ms: None,
            provider_request_id: None,
            updated_at: now,
        }
    }

    /// Administrative retry of a failed task with a fresh attempt budget.
    ///
    /// Clears every trace of the previous run so the task reads as newly
    /// queued.
    #[must_use]
    pub fn requeue(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            attempt: Some(0),
            next_run_at: Some(now),
            last_error: Some(None),
            result: Some(None),
            started_at: Some(None),
            completed_at: Some(None),
            duration_ms: Some(None),
            ..Self::touch(now)
        }
    }

    /// Processing task returned to the queue after a restart.
    #[must_use]
    pub const fn recover(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            attempt: None,
            next_run_at: None,
            last_error: None,
            result: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            provider_request_id: None,
            updated_at: now,
        }
    }
}

/// Preconditions a stored row must satisfy for an update to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionGuard {
    /// Statuses the row may currently have.
    pub from: Vec<TaskStatus>,
    /// Owner the row must belong to, when set.
    pub owner: Option<UserId>,
}

impl TransitionGuard {
    /// Guard matching a single current status, whatever the target.
    ///
    /// Used for the administrative requeue, which sits outside the worker
    /// lifecycle.
    #[must_use]
    pub fn from_status(status: TaskStatus) -> Self {
        Self {
            from: vec![status],
            owner: None,
        }
    }

    /// Guard for moving a row from `from` to `to`.
    ///
    /// Matches nothing when the lifecycle forbids that move.
    #[must_use]
    pub fn between(from: TaskStatus, to: TaskStatus) -> Self {
        let allowed = if from.can_transition_to(to) {
            vec![from]
        } else {
            Vec::new()
        };
        Self {
            from: allowed,
            owner: None,
        }
    }

    /// Guard matching every status the lifecycle lets move to `to`.
    #[must_use]
    pub fn entering(to: TaskStatus) -> Self {
        Self {
            from: TaskStatus::ALL
                .into_iter()
                .filter(|status| status.can_transition_to(to))
                .collect(),
            owner: None,
        }
    }

    /// Restricts the guard to rows owned by `user`.
    #[must_use]
    pub const fn owned_by(mut self, user: UserId) -> Self {
        self.owner = Some(user);
        self
    }

    /// Returns whether a row with the given status and owner matches.
    #[must_use]
    pub fn matches(&self, status: TaskStatus, owner: Option<UserId>) -> bool {
        self.from.contains(&status) && self.owner.is_none_or(|required| owner == Some(required))
    }
}
