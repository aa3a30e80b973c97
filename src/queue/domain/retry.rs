//! Retry policy applied to failed task attempts.

use super::QueueTask;
use chrono::{DateTime, Duration, Utc};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The error can never succeed on retry.
    Fatal,
    /// Transport-level failure; retried with a doubled backoff.
    Network,
    /// Any other failure; retried with the base backoff.
    Retryable,
}

impl FailureClass {
    /// Backoff multiplier applied to the base delay.
    #[must_use]
    pub const fn backoff_multiplier(self) -> i32 {
        match self {
            Self::Network => 2,
            Self::Fatal | Self::Retryable => 1,
        }
    }
}

/// Outcome of applying the retry policy to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Complete the task without retrying.
    Skip,
    /// Return the task to pending.
    RetryAt {
        /// Attempt counter after this failure.
        attempt: u32,
        /// Earliest time of the next attempt.
        next_run_at: DateTime<Utc>,
    },
    /// No attempts remain; fail the task.
    Exhausted,
}

/// Linear backoff policy: `base * attempt * multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given base delay.
    #[must_use]
    pub const fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Returns the delay before the given (one-based) retry attempt.
    ///
    /// Saturates at [`Duration::MAX`].
    #[must_use]
    pub fn backoff(&self, attempt: u32, class: FailureClass) -> Duration {
        let factor = i64::from(attempt).saturating_mul(i64::from(class.backoff_multiplier()));
        let millis = self.base.num_milliseconds().saturating_mul(factor);
        Duration::try_milliseconds(millis).unwrap_or(Duration::MAX)
    }

    /// Decides what happens to `task` after a failed attempt at `now`.
    #[must_use]
    pub fn decide(&self, task: &QueueTask, class: FailureClass, now: DateTime<Utc>) -> RetryDecision {
        if class == FailureClass::Fatal {
            return RetryDecision::Skip;
        }
        if task.attempts_exhausted() {
            return RetryDecision::Exhausted;
        }
        let attempt = task.attempt().saturating_add(1);
        let next_run_at = now
            .checked_add_signed(self.backoff(attempt, class))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RetryDecision::RetryAt {
            attempt,
            next_run_at,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::minutes(1))
    }
}
