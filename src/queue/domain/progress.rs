//! Derived views over groups of tasks.

use super::{BatchId, TaskStatus};
use serde::{Deserialize, Serialize};

/// Task counts keyed by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Pending tasks.
    pub pending: u64,
    /// Processing tasks.
    pub processing: u64,
    /// Completed tasks.
    pub completed: u64,
    /// Failed tasks.
    pub failed: u64,
    /// Cancelled tasks.
    pub cancelled: u64,
}

impl StatusCounts {
    /// Adds `count` tasks with the given status.
    pub const fn add(&mut self, status: TaskStatus, count: u64) {
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Processing => &mut self.processing,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot = slot.saturating_add(count);
    }

    /// Returns the count for one status.
    #[must_use]
    pub const fn get(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Processing => self.processing,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    /// Returns the number of tasks across every status.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending
            .saturating_add(self.processing)
            .saturating_add(self.completed)
            .saturating_add(self.failed)
            .saturating_add(self.cancelled)
    }
}

impl FromIterator<TaskStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = TaskStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.add(status, 1);
        }
        counts
    }
}

/// Queue-wide statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Counts by status.
    pub counts: StatusCounts,
    /// Tasks created since the start of the current UTC day.
    pub created_today: u64,
}

/// Completion summary for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Tasks in the batch.
    pub total: u64,
    /// Completed tasks, including skipped ones.
    pub completed: u64,
    /// Failed and cancelled tasks.
    pub failed: u64,
    /// Pending and processing tasks.
    pub pending: u64,
    /// Share of finished tasks, 0 to 100.
    pub percent: u8,
}

impl BatchProgress {
    /// Summarises the statuses of a batch's tasks.
    #[must_use]
    pub fn from_counts(batch_id: BatchId, counts: &StatusCounts) -> Self {
        let total = counts.total();
        let completed = counts.completed;
        let failed = counts.failed.saturating_add(counts.cancelled);
        let pending = counts.pending.saturating_add(counts.processing);
        let finished = completed.saturating_add(failed);
        let percent = finished
            .saturating_mul(100)
            .checked_div(total)
            .and_then(|value| u8::try_from(value).ok())
            .unwrap_or(0);
        Self {
            batch_id,
            total,
            completed,
            failed,
            pending,
            percent,
        }
    }
}
