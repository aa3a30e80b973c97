//! Error types for queue domain validation and parsing.

use thiserror::Error;

/// Errors returned while constructing queue domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// Neither an MSISDN nor a CLI was supplied for the task target.
    #[error("task target requires an MSISDN or CLI")]
    MissingTarget,

    /// The priority is outside the supported range.
    #[error("invalid priority {0}, expected a value between 1 and 10")]
    InvalidPriority(u8),

    /// The maximum attempt count must allow at least one attempt.
    #[error("invalid max attempts {0}, expected at least 1")]
    InvalidMaxAttempts(u32),

    /// The requested status is empty after trimming.
    #[error("target status must not be empty")]
    EmptyStatus,

    /// The label field name is not one of the supported label slots.
    #[error("unsupported label field: {0}")]
    UnknownLabelField(String),

    /// The label value exceeds the persisted column width.
    #[error("label value is {0} characters long, maximum is 200")]
    LabelTooLong(usize),

    /// A batch must contain at least one task.
    #[error("batch must contain at least one task")]
    EmptyBatch,

    /// A batch exceeds the representable size.
    #[error("batch of {0} tasks is too large")]
    BatchTooLarge(usize),
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing task types from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task type: {0}")]
pub struct ParseTaskTypeError(pub String);
