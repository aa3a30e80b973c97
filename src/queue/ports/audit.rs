//! Audit ports for queue lifecycle events.
//!
//! Producers hand events to an [`AuditSink`] without waiting. A durable
//! [`AuditLog`] sits behind the sink and is written from a dedicated task.

use crate::queue::domain::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Non-blocking audit entry point used by the queue service and the worker.
pub trait AuditSink: Send + Sync {
    /// Submits an event. Implementations must not block the caller.
    fn record(&self, event: AuditEvent);
}

/// Durable audit storage.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Persists one event.
    async fn append(&self, event: AuditEvent) -> Result<(), AuditLogError>;
}

/// Queue lifecycle action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// Task enqueued.
    QueueAdd,
    /// Retry scheduled.
    QueueRetry,
    /// Task completed or skipped.
    QueueComplete,
    /// Task failed.
    QueueFail,
    /// Task cancelled.
    QueueCancel,
}

impl AuditAction {
    /// Returns the stored action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueAdd => "QUEUE_ADD",
            Self::QueueRetry => "QUEUE_RETRY",
            Self::QueueComplete => "QUEUE_COMPLETE",
            Self::QueueFail => "QUEUE_FAIL",
            Self::QueueCancel => "QUEUE_CANCEL",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Task the event concerns.
    pub task_id: TaskId,
    /// Entity identifier, normally the target MSISDN.
    pub entity_id: String,
    /// Lifecycle action.
    pub action: AuditAction,
    /// Acting user, `worker` for worker transitions.
    pub actor: String,
    /// Error or result detail.
    pub detail: Option<String>,
    /// Attempt counter after a retry was scheduled.
    pub attempt: Option<u32>,
    /// Attempt budget, set with `attempt`.
    pub max_attempts: Option<u32>,
    /// Provider round-trip time in milliseconds.
    pub provider_response_ms: Option<i64>,
    /// When the event happened.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Actor recorded for worker transitions.
    pub const WORKER: &'static str = "worker";

    fn new(
        task_id: TaskId,
        entity_id: &str,
        action: AuditAction,
        actor: &str,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            entity_id: entity_id.to_owned(),
            action,
            actor: actor.to_owned(),
            detail: None,
            attempt: None,
            max_attempts: None,
            provider_response_ms: None,
            recorded_at,
        }
    }

    /// Task enqueued by `actor`.
    #[must_use]
    pub fn queued(task_id: TaskId, entity_id: &str, actor: &str, at: DateTime<Utc>) -> Self {
        Self::new(task_id, entity_id, AuditAction::QueueAdd, actor, at)
    }

    /// Retry scheduled after a failed attempt.
    #[must_use]
    pub fn retry(
        task_id: TaskId,
        entity_id: &str,
        attempt: u32,
        max_attempts: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            detail: Some(format!("Attempt {attempt}/{max_attempts}: {error}")),
            attempt: Some(attempt),
            max_attempts: Some(max_attempts),
            ..Self::new(task_id, entity_id, AuditAction::QueueRetry, Self::WORKER, at)
        }
    }

    /// Task completed, including fatal skips.
    #[must_use]
    pub fn completed(
        task_id: TaskId,
        entity_id: &str,
        result: &str,
        response_ms: i64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            detail: Some(result.to_owned()),
            provider_response_ms: Some(response_ms),
            ..Self::new(task_id, entity_id, AuditAction::QueueComplete, Self::WORKER, at)
        }
    }

    /// Task failed.
    #[must_use]
    pub fn failed(
        task_id: TaskId,
        entity_id: &str,
        error: &str,
        response_ms: Option<i64>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            detail: Some(error.to_owned()),
            provider_response_ms: response_ms,
            ..Self::new(task_id, entity_id, AuditAction::QueueFail, Self::WORKER, at)
        }
    }

    /// Task cancelled by `actor`.
    #[must_use]
    pub fn cancelled(task_id: TaskId, entity_id: &str, actor: &str, at: DateTime<Utc>) -> Self {
        Self::new(task_id, entity_id, AuditAction::QueueCancel, actor, at)
    }

    /// Failed task requeued by `actor`.
    #[must_use]
    pub fn requeued(task_id: TaskId, entity_id: &str, actor: &str, at: DateTime<Utc>) -> Self {
        Self {
            detail: Some("manual retry".to_owned()),
            attempt: Some(0),
            ..Self::new(task_id, entity_id, AuditAction::QueueRetry, actor, at)
        }
    }
}

/// Errors returned by durable audit logs.
#[derive(Debug, Clone, Error)]
pub enum AuditLogError {
    /// Persistence-layer failure.
    #[error("audit persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl AuditLogError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
