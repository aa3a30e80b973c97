//! In-memory adapters for tests and single-process embedding.

mod audit;
mod clock;
mod mirror;
mod repository;

pub use audit::{InMemoryAuditLog, RecordingEventBroadcaster};
pub use clock::ManualClock;
pub use mirror::{CountingStatsCache, InMemorySimMirror};
pub use repository::InMemoryTaskRepository;
