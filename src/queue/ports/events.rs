//! Port for pushing task outcomes to connected UI clients.

use crate::queue::domain::{TaskId, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};

/// Non-blocking fan-out of task events.
pub trait EventBroadcaster: Send + Sync {
    /// Publishes an event. Slow subscribers may miss events.
    fn emit(&self, event: TaskEvent);
}

/// Terminal outcome announced to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventKind {
    /// The task completed or was skipped.
    TaskCompleted,
    /// The task failed after exhausting its attempts.
    TaskFailed,
}

/// Event payload sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Outcome kind.
    pub kind: TaskEventKind,
    /// Task identifier.
    pub task_id: TaskId,
    /// Task type.
    pub task_type: TaskType,
    /// Status after the transition.
    pub status: TaskStatus,
    /// Target MSISDN.
    pub msisdn: String,
    /// Result or error text.
    pub result: String,
    /// Attempt duration in milliseconds.
    pub duration_ms: i64,
}
