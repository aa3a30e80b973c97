//! Polling worker that claims due tasks and runs their handlers.
//!
//! One loop runs per process. Each tick claims the due pending tasks and
//! processes them sequentially; ticks never overlap. Every state write is a
//! guarded transition, so a task cancelled while its provider call is in
//! flight keeps its cancelled state.

use super::handlers::{HandlerError, HandlerOutcome, TaskHandlers};
use crate::queue::{
    domain::{
        NewQueueTask, QueueTask, RetryDecision, RetryPolicy, TaskStatus, TaskType, TaskUpdate,
        TransitionGuard,
    },
    ports::{
        AuditEvent, AuditSink, EventBroadcaster, HistoryAction, HistoryRecord, ProviderClient,
        SimMirror, StatsCache, TaskEvent, TaskEventKind, TaskRepository, TaskRepositoryResult,
    },
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error recorded when startup recovery fails an exhausted task.
const RECOVERED_EXHAUSTED: &str = "Max attempts exceeded (recovered at startup)";

/// Scheduling parameters for the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Delay between ticks.
    pub poll_interval: Duration,
    /// Most tasks claimed per tick.
    pub claim_limit: usize,
    /// Backoff applied to retryable failures.
    pub retry: RetryPolicy,
    /// Delay before the mirror is refreshed after a provider write.
    pub reconcile_delay: chrono::Duration,
    /// Attempt budget of reconciliation tasks.
    pub reconcile_max_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            claim_limit: 50,
            retry: RetryPolicy::default(),
            reconcile_delay: chrono::Duration::seconds(15),
            reconcile_max_attempts: 3,
        }
    }
}

/// Collaborators the worker is built from.
pub struct WorkerDependencies<R, P, M, C>
where
    R: TaskRepository,
    P: ProviderClient,
    M: SimMirror,
    C: Clock + Send + Sync,
{
    /// Task store.
    pub repository: Arc<R>,
    /// Upstream provider.
    pub provider: Arc<P>,
    /// Local SIM mirror and history log.
    pub mirror: Arc<M>,
    /// Time source.
    pub clock: Arc<C>,
    /// Audit sink.
    pub audit: Arc<dyn AuditSink>,
    /// UI event fan-out.
    pub events: Arc<dyn EventBroadcaster>,
    /// Dashboard statistics cache.
    pub stats: Arc<dyn StatsCache>,
}

/// What happened to one task during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    /// The handler succeeded.
    Completed,
    /// A fatal error completed the task without retry.
    Skipped,
    /// A retry was scheduled.
    Retrying {
        /// Attempt counter after the failure.
        attempt: u32,
        /// Earliest time of the next attempt.
        next_run_at: DateTime<Utc>,
    },
    /// The task failed terminally.
    Failed,
    /// Another writer changed the task first, typically a cancellation.
    Superseded,
}

/// Counts reported by startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Processing tasks returned to pending.
    pub requeued: u64,
    /// Pending tasks failed for exhausted attempts.
    pub failed: u64,
}

/// Runs both startup recovery passes against `repository`.
///
/// # Errors
///
/// Returns the repository error of the first failing pass.
pub async fn recover_tasks<R>(repository: &R, now: DateTime<Utc>) -> TaskRepositoryResult<RecoveryReport>
where
    R: TaskRepository + ?Sized,
{
    let requeued = repository.recover_processing(now).await?;
    let failed = repository.fail_exhausted(now, RECOVERED_EXHAUSTED).await?;
    if requeued > 0 || failed > 0 {
        info!(requeued, failed, "recovered tasks left over from a previous run");
    }
    Ok(RecoveryReport { requeued, failed })
}

/// Background task processor.
pub struct Worker<R, P, M, C>
where
    R: TaskRepository,
    P: ProviderClient,
    M: SimMirror,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    handlers: TaskHandlers<P, M>,
    mirror: Arc<M>,
    clock: Arc<C>,
    audit: Arc<dyn AuditSink>,
    events: Arc<dyn EventBroadcaster>,
    stats: Arc<dyn StatsCache>,
    settings: WorkerSettings,
    paused: AtomicBool,
}

impl<R, P, M, C> Worker<R, P, M, C>
where
    R: TaskRepository + 'static,
    P: ProviderClient + 'static,
    M: SimMirror + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a worker.
    #[must_use]
    pub fn new(deps: WorkerDependencies<R, P, M, C>, settings: WorkerSettings) -> Self {
        let WorkerDependencies {
            repository,
            provider,
            mirror,
            clock,
            audit,
            events,
            stats,
        } = deps;
        Self {
            repository,
            handlers: TaskHandlers::new(provider, Arc::clone(&mirror)),
            mirror,
            clock,
            audit,
            events,
            stats,
            settings,
            paused: AtomicBool::new(false),
        }
    }

    /// Stops claiming tasks until [`Worker::resume`] is called.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("worker paused");
    }

    /// Resumes claiming tasks.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("worker resumed");
    }

    /// Returns `true` while the worker is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Runs both startup recovery passes.
    ///
    /// # Errors
    ///
    /// Returns the repository error of the first failing pass.
    pub async fn recover(&self) -> TaskRepositoryResult<RecoveryReport> {
        recover_tasks(&*self.repository, self.clock.utc()).await
    }

    /// Spawns [`Worker::run`] on the current runtime.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Recovers leftover tasks, then ticks until `cancel` fires.
    ///
    /// Cancellation is observed between ticks; a tick in progress finishes
    /// first.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(err) = self.recover().await {
            error!(error = %err, "startup recovery failed");
        }
        let interval = self.settings.poll_interval;
        info!(?interval, "queue worker started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("queue worker stopped");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
            }
        }
    }

    /// Processes every task due now and returns how many were handled.
    ///
    /// Store errors are logged; they never stop the loop.
    pub async fn tick(&self) -> usize {
        if self.is_paused() {
            debug!("worker paused, skipping tick");
            return 0;
        }
        let due = match self
            .repository
            .find_due(self.clock.utc(), self.settings.claim_limit)
            .await
        {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "failed to load due tasks");
                return 0;
            }
        };
        let mut handled = 0;
        for task in due {
            let task_id = task.id();
            match self.process(task).await {
                Ok(disposition) => {
                    debug!(%task_id, ?disposition, "task processed");
                    handled += 1;
                }
                Err(err) => error!(%task_id, error = %err, "task state write failed"),
            }
        }
        handled
    }

    /// Claims and runs one task, then records the outcome.
    ///
    /// # Errors
    ///
    /// Returns the repository error of a failed state write.
    pub async fn process(&self, task: QueueTask) -> TaskRepositoryResult<TaskDisposition> {
        info!(
            task_id = %task.id(),
            task_type = %task.task_type(),
            msisdn = task.target().msisdn(),
            attempt = task.attempt(),
            max_attempts = task.max_attempts(),
            "processing task"
        );
        if task.attempts_exhausted() {
            let message = format!(
                "Max attempts exceeded ({}/{})",
                task.attempt(),
                task.max_attempts()
            );
            let guard = TransitionGuard::between(TaskStatus::Pending, TaskStatus::Failed);
            return self.finish_failed(&task, &guard, &message, None).await;
        }

        let claimed = self
            .repository
            .transition(
                task.id(),
                &TransitionGuard::between(TaskStatus::Pending, TaskStatus::Processing),
                &TaskUpdate::claim(self.clock.utc()),
            )
            .await?;
        if !claimed {
            debug!(task_id = %task.id(), "claim lost, task changed concurrently");
            return Ok(TaskDisposition::Superseded);
        }

        let started = Instant::now();
        let outcome = self.handlers.handle(&task, self.clock.utc()).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match outcome {
            Ok(success) => self.complete(&task, success, duration_ms).await,
            Err(err) => self.fail_attempt(&task, &err, duration_ms).await,
        }
    }

    async fn complete(
        &self,
        task: &QueueTask,
        outcome: HandlerOutcome,
        duration_ms: i64,
    ) -> TaskRepositoryResult<TaskDisposition> {
        let now = self.clock.utc();
        let HandlerOutcome {
            result,
            provider_request_id,
            reconcile,
        } = outcome;
        self.schedule_reconcile(task, reconcile, now).await;

        let applied = self
            .repository
            .transition(
                task.id(),
                &TransitionGuard::between(TaskStatus::Processing, TaskStatus::Completed),
                &TaskUpdate::complete(result.clone(), provider_request_id, duration_ms, now),
            )
            .await?;
        if !applied {
            info!(task_id = %task.id(), "task changed while in flight, completion dropped");
            return Ok(TaskDisposition::Superseded);
        }

        info!(task_id = %task.id(), duration_ms, "task completed");
        self.audit.record(AuditEvent::completed(
            task.id(),
            task.target().msisdn(),
            &result,
            duration_ms,
            now,
        ));
        if matches!(task.task_type(), TaskType::StatusChange | TaskType::Reconcile) {
            self.stats.invalidate();
        }
        self.announce(task, TaskEventKind::TaskCompleted, &result, duration_ms, now)
            .await;
        Ok(TaskDisposition::Completed)
    }

    async fn fail_attempt(
        &self,
        task: &QueueTask,
        err: &HandlerError,
        duration_ms: i64,
    ) -> TaskRepositoryResult<TaskDisposition> {
        let now = self.clock.utc();
        let message = err.to_string();
        let class = err.failure_class();
        match self.settings.retry.decide(task, class, now) {
            RetryDecision::Skip => {
                let explanation = err.explanation(task.target().identifier().unwrap_or_default());
                let update = TaskUpdate::skip(&explanation, message.clone(), duration_ms, now);
                let guard = TransitionGuard::between(TaskStatus::Processing, TaskStatus::Completed);
                if !self.repository.transition(task.id(), &guard, &update).await? {
                    return Ok(TaskDisposition::Superseded);
                }
                warn!(task_id = %task.id(), error = %message, "fatal provider error, task skipped");
                let result = update.result.flatten().unwrap_or_default();
                // Audited only: a skip changed nothing at the provider.
                self.audit.record(AuditEvent::completed(
                    task.id(),
                    task.target().msisdn(),
                    &result,
                    duration_ms,
                    now,
                ));
                Ok(TaskDisposition::Skipped)
            }
            RetryDecision::RetryAt {
                attempt,
                next_run_at,
            } => {
                let update =
                    TaskUpdate::schedule_retry(attempt, next_run_at, &message, duration_ms, now);
                let guard = TransitionGuard::between(TaskStatus::Processing, TaskStatus::Pending);
                if !self.repository.transition(task.id(), &guard, &update).await? {
                    return Ok(TaskDisposition::Superseded);
                }
                warn!(
                    task_id = %task.id(),
                    attempt,
                    max_attempts = task.max_attempts(),
                    ?class,
                    %next_run_at,
                    error = %message,
                    "task attempt failed, retry scheduled"
                );
                self.audit.record(AuditEvent::retry(
                    task.id(),
                    task.target().msisdn(),
                    attempt,
                    task.max_attempts(),
                    &message,
                    now,
                ));
                Ok(TaskDisposition::Retrying {
                    attempt,
                    next_run_at,
                })
            }
            RetryDecision::Exhausted => {
                let guard = TransitionGuard::between(TaskStatus::Processing, TaskStatus::Failed);
                self.finish_failed(task, &guard, &message, Some(duration_ms))
                    .await
            }
        }
    }

    async fn finish_failed(
        &self,
        task: &QueueTask,
        guard: &TransitionGuard,
        message: &str,
        duration_ms: Option<i64>,
    ) -> TaskRepositoryResult<TaskDisposition> {
        let now = self.clock.utc();
        let update = TaskUpdate::fail(message, duration_ms, now);
        if !self.repository.transition(task.id(), guard, &update).await? {
            return Ok(TaskDisposition::Superseded);
        }
        error!(task_id = %task.id(), error = %message, "task failed");
        self.audit.record(AuditEvent::failed(
            task.id(),
            task.target().msisdn(),
            message,
            duration_ms,
            now,
        ));
        self.announce(
            task,
            TaskEventKind::TaskFailed,
            message,
            duration_ms.unwrap_or_default(),
            now,
        )
        .await;
        Ok(TaskDisposition::Failed)
    }

    /// Broadcasts a terminal outcome and records it in the SIM history.
    /// Reconciliation tasks stay silent.
    async fn announce(
        &self,
        task: &QueueTask,
        kind: TaskEventKind,
        result: &str,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) {
        if task.task_type() == TaskType::Reconcile {
            return;
        }
        let (status, action) = match kind {
            TaskEventKind::TaskCompleted => (TaskStatus::Completed, HistoryAction::TaskCompleted),
            TaskEventKind::TaskFailed => (TaskStatus::Failed, HistoryAction::TaskFailed),
        };
        let msisdn = task.target().msisdn().to_owned();
        self.events.emit(TaskEvent {
            kind,
            task_id: task.id(),
            task_type: task.task_type(),
            status,
            msisdn: msisdn.clone(),
            result: result.to_owned(),
            duration_ms,
        });
        let history = HistoryRecord::from_worker(msisdn, action, "status", task.id(), now)
            .with_values(result, status.as_str())
            .changed_by(task.requester().username.clone());
        if let Err(err) = self.mirror.append_history(history).await {
            warn!(task_id = %task.id(), error = %err, "history write failed");
        }
    }

    async fn schedule_reconcile(&self, task: &QueueTask, targets: Vec<String>, now: DateTime<Utc>) {
        if targets.is_empty() {
            return;
        }
        let run_at = now
            .checked_add_signed(self.settings.reconcile_delay)
            .unwrap_or(now);
        let reconcile = NewQueueTask::reconcile(
            targets,
            self.settings.reconcile_max_attempts,
            run_at,
            now,
        );
        match self.repository.insert(reconcile).await {
            Ok(scheduled) => debug!(
                task_id = %task.id(),
                reconcile_task_id = %scheduled.id(),
                %run_at,
                "mirror reconciliation scheduled"
            ),
            Err(err) => warn!(
                task_id = %task.id(),
                error = %err,
                "failed to schedule mirror reconciliation"
            ),
        }
    }
}
