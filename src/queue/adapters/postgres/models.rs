//! Diesel row models for queued task persistence.

use super::schema::queue_tasks;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for queued tasks.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = queue_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Task identifier.
    pub id: i64,
    /// Correlation identifier.
    pub request_id: uuid::Uuid,
    /// Batch identifier.
    pub batch_id: Option<uuid::Uuid>,
    /// Position within the batch.
    pub batch_index: Option<i32>,
    /// Batch size.
    pub batch_total: Option<i32>,
    /// Task type.
    pub task_type: String,
    /// Scheduling priority.
    pub priority: i16,
    /// Payload JSON.
    pub payload: Value,
    /// Target MSISDN.
    pub target_msisdn: String,
    /// Target CLI.
    pub target_cli: String,
    /// Creating user.
    pub user_id: Option<i64>,
    /// Creating username.
    pub username: String,
    /// Client IP address.
    pub ip_address: String,
    /// Lifecycle status.
    pub status: String,
    /// Attempts consumed.
    pub attempt: i32,
    /// Attempt budget.
    pub max_attempts: i32,
    /// Earliest run time.
    pub next_run_at: DateTime<Utc>,
    /// Most recent error.
    pub last_error: Option<String>,
    /// Result text.
    pub result: Option<String>,
    /// Provider-side request identifier.
    pub provider_request_id: Option<i64>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempt duration.
    pub duration_ms: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert model for queued tasks; the database assigns `id`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = queue_tasks)]
pub struct NewTaskRow {
    /// Correlation identifier.
    pub request_id: uuid::Uuid,
    /// Batch identifier.
    pub batch_id: Option<uuid::Uuid>,
    /// Position within the batch.
    pub batch_index: Option<i32>,
    /// Batch size.
    pub batch_total: Option<i32>,
    /// Task type.
    pub task_type: String,
    /// Scheduling priority.
    pub priority: i16,
    /// Payload JSON.
    pub payload: Value,
    /// Target MSISDN.
    pub target_msisdn: String,
    /// Target CLI.
    pub target_cli: String,
    /// Creating user.
    pub user_id: Option<i64>,
    /// Creating username.
    pub username: String,
    /// Client IP address.
    pub ip_address: String,
    /// Lifecycle status.
    pub status: String,
    /// Attempts consumed.
    pub attempt: i32,
    /// Attempt budget.
    pub max_attempts: i32,
    /// Earliest run time.
    pub next_run_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` leaves a column untouched and `Some(None)`
/// writes `NULL`.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = queue_tasks)]
pub struct TaskChangeset {
    /// Lifecycle status.
    pub status: Option<String>,
    /// Attempts consumed.
    pub attempt: Option<i32>,
    /// Earliest run time.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Most recent error.
    pub last_error: Option<Option<String>>,
    /// Result text.
    pub result: Option<Option<String>>,
    /// Provider-side request identifier.
    pub provider_request_id: Option<i64>,
    /// Start of the latest attempt.
    pub started_at: Option<Option<DateTime<Utc>>>,
    /// Terminal transition time.
    pub completed_at: Option<Option<DateTime<Utc>>>,
    /// Attempt duration.
    pub duration_ms: Option<Option<i64>>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}
