//! Shared world state for queue processing BDD scenarios.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rstest::fixture;
use simqueue::queue::{
    adapters::memory::{
        CountingStatsCache, InMemoryAuditLog, InMemorySimMirror, InMemoryTaskRepository,
        ManualClock, RecordingEventBroadcaster,
    },
    domain::QueueTask,
    services::{QueueService, Worker, WorkerDependencies, WorkerSettings},
};

use super::provider::{ProviderMode, ScriptedProvider};

/// Service type used by the BDD world.
pub type TestQueueService = QueueService<InMemoryTaskRepository, ManualClock>;

/// Worker type used by the BDD world.
pub type TestWorker = Worker<InMemoryTaskRepository, ScriptedProvider, InMemorySimMirror, ManualClock>;

/// Scenario world for queue processing behaviour tests.
pub struct QueueWorld {
    pub repository: Arc<InMemoryTaskRepository>,
    pub mirror: Arc<InMemorySimMirror>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<InMemoryAuditLog>,
    pub events: Arc<RecordingEventBroadcaster>,
    pub stats: Arc<CountingStatsCache>,
    pub provider_mode: ProviderMode,
    pub task: Option<QueueTask>,
}

impl QueueWorld {
    /// Creates a world with an empty queue and mirror.
    #[must_use]
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            repository: Arc::new(InMemoryTaskRepository::new()),
            mirror: Arc::new(InMemorySimMirror::new()),
            clock: Arc::new(ManualClock::new(start)),
            audit: Arc::new(InMemoryAuditLog::new()),
            events: Arc::new(RecordingEventBroadcaster::new()),
            stats: Arc::new(CountingStatsCache::new()),
            provider_mode: ProviderMode::Accept,
            task: None,
        }
    }

    /// Builds a queue service over the world's adapters.
    #[must_use]
    pub fn service(&self) -> TestQueueService {
        QueueService::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.clock),
            Arc::clone(&self.audit) as _,
        )
    }

    /// Builds a worker whose provider answers in the scenario's mode.
    #[must_use]
    pub fn worker(&self) -> TestWorker {
        Worker::new(
            WorkerDependencies {
                repository: Arc::clone(&self.repository),
                provider: Arc::new(ScriptedProvider::new(self.provider_mode)),
                mirror: Arc::clone(&self.mirror),
                clock: Arc::clone(&self.clock),
                audit: Arc::clone(&self.audit) as _,
                events: Arc::clone(&self.events) as _,
                stats: Arc::clone(&self.stats) as _,
            },
            WorkerSettings::default(),
        )
    }

    /// Returns the task under test.
    ///
    /// # Errors
    ///
    /// Returns an error when no task has been queued yet.
    pub fn current_task(&self) -> Result<&QueueTask, eyre::Report> {
        self.task
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing queued task in scenario world"))
    }
}

impl Default for QueueWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> QueueWorld {
    QueueWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
