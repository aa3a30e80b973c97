//! Integration tests for [`PostgresTaskRepository`] using embedded `PostgreSQL`.
//!
//! Each test gets its own database cloned from a migrated template on a
//! shared cluster managed by `pg-embed-setup-unpriv`.

#![expect(
    clippy::print_stderr,
    reason = "Test cleanup warnings are informational"
)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use eyre::{Result, WrapErr, bail, ensure};
use mockable::Clock;
use pg_embedded_setup_unpriv::{TestCluster, test_support::shared_test_cluster};
use rstest::rstest;
use simqueue::queue::{
    adapters::{
        memory::{InMemoryAuditLog, ManualClock},
        postgres::{PostgresTaskRepository, build_pool},
    },
    domain::{RequestId, TaskPayload, TaskStatus, TaskUpdate, TransitionGuard, UserId},
    ports::{TaskRepository, TaskRepositoryError},
    services::{CreateTaskRequest, QueueService, QueueServiceError},
};
use tokio::runtime::Runtime;

/// SQL creating the `queue_tasks` table.
const CREATE_SCHEMA_SQL: &str =
    include_str!("../migrations/2026-10-16-000000_create_queue_tasks/up.sql");

/// Template database holding the migrated schema.
const TEMPLATE_DB: &str = "simqueue_test_template";

fn test_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("build test runtime")
}

fn ensure_template(cluster: &TestCluster) -> Result<()> {
    cluster
        .ensure_template_exists(TEMPLATE_DB, |db_name| {
            let url = cluster.connection().database_url(db_name);
            let mut conn = PgConnection::establish(&url).map_err(|e| eyre::eyre!("{e}"))?;
            conn.batch_execute(CREATE_SCHEMA_SQL)
                .map_err(|e| eyre::eyre!("apply queue schema: {e}"))?;
            Ok(())
        })
        .wrap_err("template setup")
}

/// Drops the per-test database even when an assertion fails.
struct CleanupGuard {
    cluster: &'static TestCluster,
    db_name: String,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Err(e) = self.cluster.drop_database(self.db_name.as_str()) {
            eprintln!("Warning: failed to drop test database {}: {e}", self.db_name);
        }
    }
}

/// Repository over a fresh database. Fields drop in order, so the pool
/// closes before the database goes.
struct Context {
    repository: Arc<PostgresTaskRepository>,
    clock: Arc<ManualClock>,
    url: String,
    _guard: CleanupGuard,
}

impl Context {
    fn new(cluster: &'static TestCluster, label: &str) -> Result<Self> {
        ensure_template(cluster)?;
        let db_name = format!("test_{label}_{}", uuid::Uuid::new_v4().simple());
        cluster
            .create_database_from_template(db_name.as_str(), TEMPLATE_DB)
            .wrap_err("create test database")?;
        let guard = CleanupGuard {
            cluster,
            db_name: db_name.clone(),
        };
        let url = cluster.connection().database_url(&db_name);
        let pool = build_pool(&url, 1).wrap_err("build test pool")?;
        let start = Utc
            .with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
            .single()
            .ok_or_else(|| eyre::eyre!("invalid start time"))?;
        Ok(Self {
            repository: Arc::new(PostgresTaskRepository::new(pool)),
            clock: Arc::new(ManualClock::new(start)),
            url,
            _guard: guard,
        })
    }

    fn service(&self) -> QueueService<PostgresTaskRepository, ManualClock> {
        QueueService::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.clock),
            Arc::new(InMemoryAuditLog::new()),
        )
    }

    /// Runs raw SQL against this test's database.
    fn execute(&self, sql: &str) -> Result<()> {
        let mut conn = PgConnection::establish(&self.url).wrap_err("connect to test database")?;
        conn.batch_execute(sql).wrap_err("execute test SQL")
    }
}

fn suspend(msisdn: &str) -> CreateTaskRequest {
    CreateTaskRequest::status_change(msisdn, "Suspended").requested_by(UserId::new(7), "alice")
}

#[rstest]
fn stored_task_reads_back_by_id_and_request_id(
    shared_test_cluster: &'static TestCluster,
) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "read_back")?;
    test_runtime()?.block_on(async {
        let request_id = RequestId::new();
        let created = ctx
            .service()
            .create_task(
                CreateTaskRequest::label_update("972500000001", "label_2", "fleet-7")
                    .requested_by(UserId::new(7), "alice")
                    .with_request_id(request_id),
            )
            .await?;

        let Some(by_id) = ctx.repository.find_by_id(created.id()).await? else {
            bail!("task {} missing after insert", created.id());
        };
        ensure!(by_id == created);
        ensure!(
            matches!(by_id.payload(), TaskPayload::LabelUpdate { value, .. } if value == "fleet-7")
        );

        let by_request = ctx.repository.find_by_request_id(request_id).await?;
        ensure!(by_request.map(|task| task.id()) == Some(created.id()));
        Ok(())
    })
}

#[rstest]
fn duplicate_request_id_is_rejected(shared_test_cluster: &'static TestCluster) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "duplicate")?;
    test_runtime()?.block_on(async {
        let request_id = RequestId::new();
        ctx.service()
            .create_task(suspend("972500000001").with_request_id(request_id))
            .await?;

        let result = ctx
            .service()
            .create_task(suspend("972500000002").with_request_id(request_id))
            .await;

        ensure!(matches!(
            result,
            Err(QueueServiceError::Repository(
                TaskRepositoryError::DuplicateRequestId(duplicate)
            )) if duplicate == request_id
        ));
        Ok(())
    })
}

#[rstest]
fn batch_is_stored_in_order_with_progress(
    shared_test_cluster: &'static TestCluster,
) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "batch_order")?;
    test_runtime()?.block_on(async {
        let created = ctx
            .service()
            .create_batch(vec![
                suspend("972500000001"),
                suspend("972500000002"),
                suspend("972500000003"),
            ])
            .await?;

        let stored = ctx.repository.find_by_batch(created.batch_id).await?;
        let ids: Vec<_> = stored.iter().map(|task| task.id()).collect();
        ensure!(ids == created.task_ids);

        let progress = ctx.service().get_batch_progress(created.batch_id).await?;
        ensure!(progress.total == 3);
        ensure!(progress.pending == 3);
        ensure!(progress.percent == 0);
        Ok(())
    })
}

#[rstest]
fn batch_rejected_by_the_database_stores_nothing(
    shared_test_cluster: &'static TestCluster,
) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "batch_atomic")?;
    ctx.execute(
        "ALTER TABLE queue_tasks ADD CONSTRAINT reject_third_member \
         CHECK (target_msisdn <> '972500000003')",
    )?;
    test_runtime()?.block_on(async {
        let result = ctx
            .service()
            .create_batch(vec![
                suspend("972500000001"),
                suspend("972500000002"),
                suspend("972500000003"),
            ])
            .await;

        ensure!(matches!(
            result,
            Err(QueueServiceError::Repository(TaskRepositoryError::Persistence(_)))
        ));
        let counts = ctx.repository.count_by_status().await?;
        ensure!(counts.get(TaskStatus::Pending) == 0);
        ensure!(ctx.repository.count_created_since(ctx.clock.utc() - Duration::days(1)).await? == 0);
        Ok(())
    })
}

#[rstest]
fn batch_reusing_a_stored_request_id_stores_nothing(
    shared_test_cluster: &'static TestCluster,
) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "batch_duplicate")?;
    test_runtime()?.block_on(async {
        let request_id = RequestId::new();
        ctx.service()
            .create_task(suspend("972500000009").with_request_id(request_id))
            .await?;

        let result = ctx
            .service()
            .create_batch(vec![
                suspend("972500000001"),
                suspend("972500000002").with_request_id(request_id),
            ])
            .await;

        ensure!(matches!(
            result,
            Err(QueueServiceError::Repository(
                TaskRepositoryError::DuplicateRequestId(duplicate)
            )) if duplicate == request_id
        ));
        ensure!(ctx.repository.count_by_status().await?.get(TaskStatus::Pending) == 1);
        Ok(())
    })
}

#[rstest]
fn due_tasks_come_back_by_priority(shared_test_cluster: &'static TestCluster) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "due")?;
    test_runtime()?.block_on(async {
        let normal = ctx
            .service()
            .create_task(suspend("972500000001").with_priority(5))
            .await?;
        let urgent = ctx
            .service()
            .create_task(suspend("972500000002").with_priority(1))
            .await?;

        let due = ctx.repository.find_due(ctx.clock.utc(), 10).await?;

        let ids: Vec<_> = due.iter().map(|task| task.id()).collect();
        ensure!(ids == vec![urgent.id(), normal.id()]);
        Ok(())
    })
}

#[rstest]
fn guarded_transition_applies_once(shared_test_cluster: &'static TestCluster) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "guarded")?;
    test_runtime()?.block_on(async {
        let task = ctx.service().create_task(suspend("972500000001")).await?;
        let claim_guard = TransitionGuard::between(TaskStatus::Pending, TaskStatus::Processing);
        let claim = TaskUpdate::claim(ctx.clock.utc());

        ensure!(ctx.repository.transition(task.id(), &claim_guard, &claim).await?);
        ensure!(!ctx.repository.transition(task.id(), &claim_guard, &claim).await?);

        let Some(claimed) = ctx.repository.find_by_id(task.id()).await? else {
            bail!("claimed task missing");
        };
        ensure!(claimed.status() == TaskStatus::Processing);
        ensure!(claimed.started_at() == Some(ctx.clock.utc()));

        let forbidden = TransitionGuard::between(TaskStatus::Completed, TaskStatus::Pending);
        let requeue = TaskUpdate::requeue(ctx.clock.utc());
        ensure!(!ctx.repository.transition(task.id(), &forbidden, &requeue).await?);
        Ok(())
    })
}

#[rstest]
fn owner_guard_blocks_other_users(shared_test_cluster: &'static TestCluster) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "owner")?;
    test_runtime()?.block_on(async {
        let task = ctx.service().create_task(suspend("972500000001")).await?;
        let cancel = TaskUpdate::cancel(ctx.clock.utc());

        let stranger = TransitionGuard::entering(TaskStatus::Cancelled).owned_by(UserId::new(8));
        ensure!(!ctx.repository.transition(task.id(), &stranger, &cancel).await?);

        let owner = TransitionGuard::entering(TaskStatus::Cancelled).owned_by(UserId::new(7));
        ensure!(ctx.repository.transition(task.id(), &owner, &cancel).await?);
        let Some(cancelled) = ctx.repository.find_by_id(task.id()).await? else {
            bail!("cancelled task missing");
        };
        ensure!(cancelled.status() == TaskStatus::Cancelled);
        Ok(())
    })
}

#[rstest]
fn requeue_clears_the_previous_outcome(shared_test_cluster: &'static TestCluster) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "requeue")?;
    test_runtime()?.block_on(async {
        let task = ctx.service().create_task(suspend("972500000001")).await?;
        let claim_guard = TransitionGuard::between(TaskStatus::Pending, TaskStatus::Processing);
        ctx.repository
            .transition(task.id(), &claim_guard, &TaskUpdate::claim(ctx.clock.utc()))
            .await?;
        let fail_guard = TransitionGuard::between(TaskStatus::Processing, TaskStatus::Failed);
        ctx.repository
            .transition(
                task.id(),
                &fail_guard,
                &TaskUpdate::fail("Max attempts exceeded (5/5)", Some(900), ctx.clock.utc()),
            )
            .await?;

        let requeued = ctx.service().retry_task(task.id(), "admin").await?;

        let Some(stored) = ctx.repository.find_by_id(task.id()).await? else {
            bail!("requeued task missing");
        };
        ensure!(stored == requeued);
        ensure!(stored.status() == TaskStatus::Pending);
        ensure!(stored.result().is_none());
        ensure!(stored.last_error().is_none());
        ensure!(stored.started_at().is_none());
        ensure!(stored.duration_ms().is_none());
        Ok(())
    })
}

#[rstest]
fn recovery_returns_processing_tasks_to_pending(
    shared_test_cluster: &'static TestCluster,
) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "recover")?;
    test_runtime()?.block_on(async {
        let task = ctx.service().create_task(suspend("972500000001")).await?;
        let claim_guard = TransitionGuard::between(TaskStatus::Pending, TaskStatus::Processing);
        ctx.repository
            .transition(task.id(), &claim_guard, &TaskUpdate::claim(ctx.clock.utc()))
            .await?;

        let recovered = ctx.repository.recover_processing(ctx.clock.utc()).await?;

        ensure!(recovered == 1);
        let counts = ctx.repository.count_by_status().await?;
        ensure!(counts.get(TaskStatus::Pending) == 1);
        ensure!(counts.get(TaskStatus::Processing) == 0);
        Ok(())
    })
}

#[rstest]
fn exhausted_pending_tasks_are_failed(shared_test_cluster: &'static TestCluster) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "exhausted")?;
    test_runtime()?.block_on(async {
        let spent = ctx
            .service()
            .create_task(suspend("972500000001").with_max_attempts(1))
            .await?;
        let fresh = ctx.service().create_task(suspend("972500000002")).await?;
        let now = ctx.clock.utc();
        let claim_guard = TransitionGuard::between(TaskStatus::Pending, TaskStatus::Processing);
        let retry_guard = TransitionGuard::between(TaskStatus::Processing, TaskStatus::Pending);
        ctx.repository
            .transition(spent.id(), &claim_guard, &TaskUpdate::claim(now))
            .await?;
        ctx.repository
            .transition(
                spent.id(),
                &retry_guard,
                &TaskUpdate::schedule_retry(1, now, "Network Error: timed out", 40, now),
            )
            .await?;

        ctx.clock.advance(Duration::minutes(1));
        let later = ctx.clock.utc();
        let failed = ctx
            .repository
            .fail_exhausted(later, "Max attempts exceeded")
            .await?;

        ensure!(failed == 1);
        let Some(stored) = ctx.repository.find_by_id(spent.id()).await? else {
            bail!("exhausted task missing");
        };
        ensure!(stored.status() == TaskStatus::Failed);
        ensure!(stored.result() == Some("Max attempts exceeded"));
        ensure!(stored.last_error() == Some("Max attempts exceeded"));
        ensure!(stored.completed_at() == Some(later));

        let Some(untouched) = ctx.repository.find_by_id(fresh.id()).await? else {
            bail!("fresh task missing");
        };
        ensure!(untouched.status() == TaskStatus::Pending);
        ensure!(ctx.repository.fail_exhausted(later, "Max attempts exceeded").await? == 0);
        Ok(())
    })
}

#[rstest]
fn cleanup_removes_only_old_terminal_tasks(
    shared_test_cluster: &'static TestCluster,
) -> Result<()> {
    let ctx = Context::new(shared_test_cluster, "cleanup")?;
    test_runtime()?.block_on(async {
        let finished = ctx.service().create_task(suspend("972500000001")).await?;
        let waiting = ctx.service().create_task(suspend("972500000002")).await?;
        ctx.repository
            .transition(
                finished.id(),
                &TransitionGuard::between(TaskStatus::Pending, TaskStatus::Failed),
                &TaskUpdate::fail("boom", None, ctx.clock.utc()),
            )
            .await?;

        ctx.clock.advance(Duration::days(8));
        let deleted = ctx.service().cleanup_old_tasks(Duration::days(7)).await?;

        ensure!(deleted == 1);
        ensure!(ctx.repository.find_by_id(finished.id()).await?.is_none());
        ensure!(ctx.repository.find_by_id(waiting.id()).await?.is_some());
        Ok(())
    })
}
