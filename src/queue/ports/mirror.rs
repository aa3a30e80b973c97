//! Ports for the local SIM mirror, its history log and the stats cache.

use super::provider::SimRecord;
use crate::queue::domain::{LabelField, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Local copy of provider SIM records, written by task handlers.
#[async_trait]
pub trait SimMirror: Send + Sync {
    /// Returns the locally known status of each listed MSISDN.
    ///
    /// MSISDNs without a local record are absent from the map.
    async fn statuses(&self, msisdns: &[String]) -> MirrorResult<HashMap<String, String>>;

    /// Sets the status of every listed MSISDN that has a local record.
    async fn set_status(&self, msisdns: &[String], status: &str) -> MirrorResult<u64>;

    /// Sets one label on the record matching `target` by MSISDN or CLI.
    async fn set_label(&self, target: &str, field: LabelField, value: &str) -> MirrorResult<u64>;

    /// Inserts or replaces the record for `record.msisdn`.
    async fn upsert(&self, record: SimRecord) -> MirrorResult<()>;

    /// Appends one history entry.
    async fn append_history(&self, record: HistoryRecord) -> MirrorResult<()>;
}

/// Cache of dashboard statistics derived from the mirror.
pub trait StatsCache: Send + Sync {
    /// Drops cached statistics so the next read recomputes them.
    fn invalidate(&self);
}

/// Kind of change a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    /// A SIM's provisioning status changed.
    StatusChange,
    /// A single SIM field changed.
    UpdateField,
    /// A task completed.
    TaskCompleted,
    /// A task failed.
    TaskFailed,
}

impl HistoryAction {
    /// Returns the stored action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "STATUS_CHANGE",
            Self::UpdateField => "UPDATE_FIELD",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskFailed => "TASK_FAILED",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the per-SIM change history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Subscriber number.
    pub msisdn: String,
    /// Kind of change.
    pub action: HistoryAction,
    /// Field that changed.
    pub field: String,
    /// Value before the change.
    pub old_value: String,
    /// Value after the change.
    pub new_value: String,
    /// Component that made the change.
    pub source: String,
    /// User on whose behalf the change was made.
    pub changed_by: String,
    /// Task that made the change.
    pub task_id: Option<TaskId>,
    /// When the change was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Source recorded for changes made by the worker.
    pub const WORKER_SOURCE: &'static str = "WORKER";

    /// Creates a worker-sourced entry.
    #[must_use]
    pub fn from_worker(
        msisdn: impl Into<String>,
        action: HistoryAction,
        field: impl Into<String>,
        task_id: TaskId,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            msisdn: msisdn.into(),
            action,
            field: field.into(),
            old_value: String::new(),
            new_value: String::new(),
            source: Self::WORKER_SOURCE.to_owned(),
            changed_by: String::new(),
            task_id: Some(task_id),
            recorded_at,
        }
    }

    /// Sets the before and after values.
    #[must_use]
    pub fn with_values(mut self, old_value: impl Into<String>, new_value: impl Into<String>) -> Self {
        self.old_value = old_value.into();
        self.new_value = new_value.into();
        self
    }

    /// Sets the user on whose behalf the change was made.
    #[must_use]
    pub fn changed_by(mut self, username: impl Into<String>) -> Self {
        self.changed_by = username.into();
        self
    }
}

/// Errors returned by mirror implementations.
#[derive(Debug, Clone, Error)]
pub enum MirrorError {
    /// Persistence-layer failure.
    #[error("mirror persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl MirrorError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
