//! Shared fixtures: a mocked provider and an in-memory queue harness.

use std::sync::Arc;

use crate::queue::{
    adapters::memory::{
        CountingStatsCache, InMemoryAuditLog, InMemorySimMirror, InMemoryTaskRepository,
        ManualClock, RecordingEventBroadcaster,
    },
    domain::LabelField,
    ports::{
        ProviderAction, ProviderClient, ProviderOutcome, ProviderResult, SimPage, SimQuery,
        SimRecord,
    },
    services::{QueueService, Worker, WorkerDependencies, WorkerSettings},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mockall::mock;

mock! {
    pub Provider {}

    #[async_trait]
    impl ProviderClient for Provider {
        async fn login(&self) -> ProviderResult<()>;
        async fn get_sims(&self, query: &SimQuery) -> ProviderResult<SimPage>;
        async fn bulk_update(
            &self,
            targets: &[String],
            action: ProviderAction,
            value: &str,
        ) -> ProviderResult<ProviderOutcome>;
        async fn update_sim_label(
            &self,
            target: &str,
            field: LabelField,
            value: &str,
        ) -> ProviderResult<ProviderOutcome>;
        async fn get_sim_status(&self, target: &str) -> ProviderResult<Option<String>>;
    }
}

pub(super) const MSISDN: &str = "972500000001";

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
        .single()
        .expect("valid start time")
}

pub(super) fn succeeded(request_id: i64) -> ProviderOutcome {
    ProviderOutcome {
        result: "succeeded".to_owned(),
        message: "OK".to_owned(),
        request_id: Some(request_id),
    }
}

pub(super) fn sim(msisdn: &str, status: &str) -> SimRecord {
    SimRecord {
        msisdn: msisdn.to_owned(),
        cli: format!("cli-{msisdn}"),
        status: status.to_owned(),
        ..SimRecord::default()
    }
}

pub(super) type TestService = QueueService<InMemoryTaskRepository, ManualClock>;
pub(super) type TestWorker<P> = Worker<InMemoryTaskRepository, P, InMemorySimMirror, ManualClock>;

/// In-memory queue with observable side effects.
pub(super) struct Harness {
    pub repository: Arc<InMemoryTaskRepository>,
    pub mirror: Arc<InMemorySimMirror>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<InMemoryAuditLog>,
    pub events: Arc<RecordingEventBroadcaster>,
    pub stats: Arc<CountingStatsCache>,
}

impl Harness {
    pub(super) fn empty() -> Self {
        Self::new(Vec::<SimRecord>::new())
    }

    pub(super) fn new(records: impl IntoIterator<Item = SimRecord>) -> Self {
        Self {
            repository: Arc::new(InMemoryTaskRepository::new()),
            mirror: Arc::new(InMemorySimMirror::with_records(records)),
            clock: Arc::new(ManualClock::new(start())),
            audit: Arc::new(InMemoryAuditLog::new()),
            events: Arc::new(RecordingEventBroadcaster::new()),
            stats: Arc::new(CountingStatsCache::new()),
        }
    }

    pub(super) fn service(&self) -> TestService {
        QueueService::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.clock),
            Arc::clone(&self.audit) as _,
        )
    }

    pub(super) fn worker<P>(&self, provider: P) -> TestWorker<P>
    where
        P: ProviderClient + 'static,
    {
        Worker::new(
            WorkerDependencies {
                repository: Arc::clone(&self.repository),
                provider: Arc::new(provider),
                mirror: Arc::clone(&self.mirror),
                clock: Arc::clone(&self.clock),
                audit: Arc::clone(&self.audit) as _,
                events: Arc::clone(&self.events) as _,
                stats: Arc::clone(&self.stats) as _,
            },
            WorkerSettings::default(),
        )
    }
}
