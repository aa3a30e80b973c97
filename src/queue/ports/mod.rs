//! Port contracts for the task queue.
//!
//! Ports define infrastructure-agnostic interfaces used by queue services.

pub mod audit;
pub mod events;
pub mod mirror;
pub mod provider;
pub mod repository;

pub use audit::{AuditAction, AuditEvent, AuditLog, AuditLogError, AuditSink};
pub use events::{EventBroadcaster, TaskEvent, TaskEventKind};
pub use mirror::{
    HistoryAction, HistoryRecord, MirrorError, MirrorResult, SimMirror, StatsCache,
};
pub use provider::{
    ProviderAction, ProviderClient, ProviderError, ProviderErrorKind, ProviderOutcome,
    ProviderResult, SimPage, SimQuery, SimRecord,
};
pub use repository::{TaskRepository, TaskRepositoryError, TaskRepositoryResult};
