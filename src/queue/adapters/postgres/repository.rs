//! `PostgreSQL` repository implementation for queued tasks.

use super::{
    models::{NewTaskRow, TaskChangeset, TaskRow},
    schema::queue_tasks,
};
use crate::queue::{
    domain::{
        BatchId, BatchMembership, NewQueueTask, PersistedTaskData, QueueTask, RequestId,
        Requester, StatusCounts, TaskId, TaskPayload, TaskPriority, TaskStatus, TaskTarget,
        TaskUpdate, TransitionGuard, UserId,
    },
    ports::{TaskRepository, TaskRepositoryError, TaskRepositoryResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::count;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};
use std::collections::HashSet;

/// `PostgreSQL` connection pool type used by queue adapters.
pub type TaskPgPool = Pool<ConnectionManager<PgConnection>>;

/// Builds a connection pool for `database_url`.
///
/// # Errors
///
/// Returns [`PoolError`] when the initial connections cannot be opened.
pub fn build_pool(database_url: &str, max_size: u32) -> Result<TaskPgPool, PoolError> {
    Pool::builder()
        .max_size(max_size.max(1))
        .build(ConnectionManager::<PgConnection>::new(database_url))
}

/// `PostgreSQL`-backed task repository.
#[derive(Debug, Clone)]
pub struct PostgresTaskRepository {
    pool: TaskPgPool,
}

impl PostgresTaskRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: TaskPgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> TaskRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> TaskRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(TaskRepositoryError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(TaskRepositoryError::persistence)?
    }
}

fn status_strings(statuses: &[TaskStatus]) -> Vec<String> {
    statuses
        .iter()
        .map(|status| status.as_str().to_owned())
        .collect()
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn to_count(rows: usize) -> u64 {
    u64::try_from(rows).unwrap_or(u64::MAX)
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn insert(&self, task: NewQueueTask) -> TaskRepositoryResult<QueueTask> {
        let request_id = task.request_id;
        let new_row = to_new_row(&task)?;
        self.run_blocking(move |connection| {
            // Semantic error reporting only; the unique index still enforces
            // integrity between the check and the insert.
            if request_id_exists(connection, vec![request_id.into_inner()])?.is_some() {
                return Err(TaskRepositoryError::DuplicateRequestId(request_id));
            }
            let row = diesel::insert_into(queue_tasks::table)
                .values(&new_row)
                .returning(TaskRow::as_returning())
                .get_result::<TaskRow>(connection)
                .map_err(|err| map_insert_error(err, request_id))?;
            row_to_task(row)
        })
        .await
    }

    async fn insert_batch(&self, tasks: Vec<NewQueueTask>) -> TaskRepositoryResult<Vec<QueueTask>> {
        let Some(first_request) = tasks.first().map(|task| task.request_id) else {
            return Ok(Vec::new());
        };
        let mut seen = HashSet::with_capacity(tasks.len());
        if let Some(duplicate) = tasks.iter().find(|task| !seen.insert(task.request_id)) {
            return Err(TaskRepositoryError::DuplicateRequestId(duplicate.request_id));
        }
        let rows = tasks.iter().map(to_new_row).collect::<TaskRepositoryResult<Vec<_>>>()?;
        let request_ids: Vec<uuid::Uuid> = tasks
            .iter()
            .map(|task| task.request_id.into_inner())
            .collect();

        self.run_blocking(move |connection| {
            if let Some(existing) = request_id_exists(connection, request_ids)? {
                return Err(TaskRepositoryError::DuplicateRequestId(
                    RequestId::from_uuid(existing),
                ));
            }
            // A single multi-row INSERT either writes every row or none.
            let inserted = diesel::insert_into(queue_tasks::table)
                .values(&rows)
                .returning(TaskRow::as_returning())
                .get_results::<TaskRow>(connection)
                .map_err(|err| map_insert_error(err, first_request))?;
            let mut stored = inserted
                .into_iter()
                .map(row_to_task)
                .collect::<TaskRepositoryResult<Vec<_>>>()?;
            stored.sort_by_key(|task| task.batch().map_or(0, |member| member.index));
            Ok(stored)
        })
        .await
    }

    async fn find_by_id(&self, id: TaskId) -> TaskRepositoryResult<Option<QueueTask>> {
        self.run_blocking(move |connection| {
            let row = queue_tasks::table
                .filter(queue_tasks::id.eq(id.value()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()
                .map_err(TaskRepositoryError::persistence)?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn find_by_request_id(
        &self,
        request_id: RequestId,
    ) -> TaskRepositoryResult<Option<QueueTask>> {
        self.run_blocking(move |connection| {
            let row = queue_tasks::table
                .filter(queue_tasks::request_id.eq(request_id.into_inner()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()
                .map_err(TaskRepositoryError::persistence)?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn find_by_user(
        &self,
        user: UserId,
        statuses: &[TaskStatus],
        limit: usize,
    ) -> TaskRepositoryResult<Vec<QueueTask>> {
        let wanted = status_strings(statuses);
        self.run_blocking(move |connection| {
            let mut query = queue_tasks::table
                .filter(queue_tasks::user_id.eq(user.value()))
                .select(TaskRow::as_select())
                .order((queue_tasks::created_at.desc(), queue_tasks::id.desc()))
                .limit(to_limit(limit))
                .into_boxed();
            if !wanted.is_empty() {
                query = query.filter(queue_tasks::status.eq_any(wanted));
            }
            let rows = query
                .load::<TaskRow>(connection)
                .map_err(TaskRepositoryError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn find_by_batch(&self, batch: BatchId) -> TaskRepositoryResult<Vec<QueueTask>> {
        self.run_blocking(move |connection| {
            let rows = queue_tasks::table
                .filter(queue_tasks::batch_id.eq(batch.into_inner()))
                .select(TaskRow::as_select())
                .order(queue_tasks::batch_index.asc())
                .load::<TaskRow>(connection)
                .map_err(TaskRepositoryError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskRepositoryResult<Vec<QueueTask>> {
        self.run_blocking(move |connection| {
            let rows = queue_tasks::table
                .filter(queue_tasks::status.eq(TaskStatus::Pending.as_str()))
                .filter(queue_tasks::next_run_at.le(now))
                .select(TaskRow::as_select())
                .order((
                    queue_tasks::priority.asc(),
                    queue_tasks::created_at.asc(),
                    queue_tasks::id.asc(),
                ))
                .limit(to_limit(limit))
                .load::<TaskRow>(connection)
                .map_err(TaskRepositoryError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn transition(
        &self,
        id: TaskId,
        guard: &TransitionGuard,
        update: &TaskUpdate,
    ) -> TaskRepositoryResult<bool> {
        let from = status_strings(&guard.from);
        let owner = guard.owner;
        let changeset = to_changeset(update)?;
        self.run_blocking(move |connection| {
            let target = queue_tasks::table
                .filter(queue_tasks::id.eq(id.value()))
                .filter(queue_tasks::status.eq_any(from));
            let updated = match owner {
                Some(user) => diesel::update(target.filter(queue_tasks::user_id.eq(user.value())))
                    .set(&changeset)
                    .execute(connection),
                None => diesel::update(target).set(&changeset).execute(connection),
            }
            .map_err(TaskRepositoryError::persistence)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn recover_processing(&self, now: DateTime<Utc>) -> TaskRepositoryResult<u64> {
        self.run_blocking(move |connection| {
            let moved = diesel::update(
                queue_tasks::table
                    .filter(queue_tasks::status.eq(TaskStatus::Processing.as_str())),
            )
            .set((
                queue_tasks::status.eq(TaskStatus::Pending.as_str()),
                queue_tasks::updated_at.eq(now),
            ))
            .execute(connection)
            .map_err(TaskRepositoryError::persistence)?;
            Ok(to_count(moved))
        })
        .await
    }

    async fn fail_exhausted(&self, now: DateTime<Utc>, message: &str) -> TaskRepositoryResult<u64> {
        let error = message.to_owned();
        self.run_blocking(move |connection| {
            let moved = diesel::update(
                queue_tasks::table
                    .filter(queue_tasks::status.eq(TaskStatus::Pending.as_str()))
                    .filter(queue_tasks::attempt.ge(queue_tasks::max_attempts)),
            )
            .set((
                queue_tasks::status.eq(TaskStatus::Failed.as_str()),
                queue_tasks::last_error.eq(Some(error.clone())),
                queue_tasks::result.eq(Some(error)),
                queue_tasks::completed_at.eq(Some(now)),
                queue_tasks::updated_at.eq(now),
            ))
            .execute(connection)
            .map_err(TaskRepositoryError::persistence)?;
            Ok(to_count(moved))
        })
        .await
    }

    async fn count_by_status(&self) -> TaskRepositoryResult<StatusCounts> {
        self.run_blocking(|connection| {
            let rows = queue_tasks::table
                .group_by(queue_tasks::status)
                .select((queue_tasks::status, count(queue_tasks::id)))
                .load::<(String, i64)>(connection)
                .map_err(TaskRepositoryError::persistence)?;
            let mut counts = StatusCounts::default();
            for (status, total) in rows {
                let parsed = TaskStatus::try_from(status.as_str())
                    .map_err(TaskRepositoryError::persistence)?;
                counts.add(parsed, u64::try_from(total).unwrap_or_default());
            }
            Ok(counts)
        })
        .await
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> TaskRepositoryResult<u64> {
        self.run_blocking(move |connection| {
            let total = queue_tasks::table
                .filter(queue_tasks::created_at.ge(since))
                .count()
                .get_result::<i64>(connection)
                .map_err(TaskRepositoryError::persistence)?;
            Ok(u64::try_from(total).unwrap_or_default())
        })
        .await
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> TaskRepositoryResult<u64> {
        let terminal = status_strings(&TaskStatus::TERMINAL);
        self.run_blocking(move |connection| {
            let deleted = diesel::delete(
                queue_tasks::table
                    .filter(queue_tasks::status.eq_any(terminal))
                    .filter(queue_tasks::completed_at.lt(cutoff)),
            )
            .execute(connection)
            .map_err(TaskRepositoryError::persistence)?;
            Ok(to_count(deleted))
        })
        .await
    }
}

fn request_id_exists(
    connection: &mut PgConnection,
    request_ids: Vec<uuid::Uuid>,
) -> TaskRepositoryResult<Option<uuid::Uuid>> {
    queue_tasks::table
        .filter(queue_tasks::request_id.eq_any(request_ids))
        .select(queue_tasks::request_id)
        .first::<uuid::Uuid>(connection)
        .optional()
        .map_err(TaskRepositoryError::persistence)
}

fn map_insert_error(err: DieselError, request_id: RequestId) -> TaskRepositoryError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
            if is_request_id_unique_violation(info.as_ref()) =>
        {
            TaskRepositoryError::DuplicateRequestId(request_id)
        }
        _ => TaskRepositoryError::persistence(err),
    }
}

fn is_request_id_unique_violation(info: &dyn DatabaseErrorInformation) -> bool {
    info.constraint_name()
        .is_some_and(|name| name == "idx_queue_tasks_request_id")
}

fn to_new_row(task: &NewQueueTask) -> TaskRepositoryResult<NewTaskRow> {
    let payload = serde_json::to_value(&task.payload).map_err(TaskRepositoryError::persistence)?;
    let (batch_id, batch_index, batch_total) = match task.batch {
        Some(member) => (
            Some(member.batch_id.into_inner()),
            Some(i32::try_from(member.index).map_err(TaskRepositoryError::persistence)?),
            Some(i32::try_from(member.total).map_err(TaskRepositoryError::persistence)?),
        ),
        None => (None, None, None),
    };
    Ok(NewTaskRow {
        request_id: task.request_id.into_inner(),
        batch_id,
        batch_index,
        batch_total,
        task_type: task.payload.task_type().as_str().to_owned(),
        priority: i16::from(task.priority.value()),
        payload,
        target_msisdn: task.target.msisdn().to_owned(),
        target_cli: task.target.cli().to_owned(),
        user_id: task.requester.user_id.map(UserId::value),
        username: task.requester.username.clone(),
        ip_address: task.requester.ip_address.clone(),
        status: TaskStatus::Pending.as_str().to_owned(),
        attempt: 0,
        max_attempts: i32::try_from(task.max_attempts).map_err(TaskRepositoryError::persistence)?,
        next_run_at: task.next_run_at,
        created_at: task.created_at,
        updated_at: task.created_at,
    })
}

fn to_changeset(update: &TaskUpdate) -> TaskRepositoryResult<TaskChangeset> {
    let attempt = update
        .attempt
        .map(i32::try_from)
        .transpose()
        .map_err(TaskRepositoryError::persistence)?;
    Ok(TaskChangeset {
        status: update.status.map(|status| status.as_str().to_owned()),
        attempt,
        next_run_at: update.next_run_at,
        last_error: update.last_error.clone(),
        result: update.result.clone(),
        provider_request_id: update.provider_request_id,
        started_at: update.started_at,
        completed_at: update.completed_at,
        duration_ms: update.duration_ms,
        updated_at: update.updated_at,
    })
}

fn row_to_task(row: TaskRow) -> TaskRepositoryResult<QueueTask> {
    let TaskRow {
        id,
        request_id,
        batch_id,
        batch_index,
        batch_total,
        priority,
        payload,
        target_msisdn,
        target_cli,
        user_id,
        username,
        ip_address,
        status,
        attempt,
        max_attempts,
        next_run_at,
        last_error,
        result,
        provider_request_id,
        started_at,
        completed_at,
        duration_ms,
        created_at,
        updated_at,
        ..
    } = row;

    let batch = match (batch_id, batch_index, batch_total) {
        (Some(batch), Some(index), Some(total)) => Some(BatchMembership {
            batch_id: BatchId::from_uuid(batch),
            index: u32::try_from(index).map_err(TaskRepositoryError::persistence)?,
            total: u32::try_from(total).map_err(TaskRepositoryError::persistence)?,
        }),
        _ => None,
    };
    let priority_value = u8::try_from(priority).map_err(TaskRepositoryError::persistence)?;

    let data = PersistedTaskData {
        id: TaskId::new(id),
        request_id: RequestId::from_uuid(request_id),
        batch,
        priority: TaskPriority::new(priority_value).map_err(TaskRepositoryError::persistence)?,
        payload: serde_json::from_value::<TaskPayload>(payload)
            .map_err(TaskRepositoryError::persistence)?,
        target: TaskTarget::new(target_msisdn, target_cli),
        requester: Requester {
            user_id: user_id.map(UserId::new),
            username,
            ip_address,
        },
        status: TaskStatus::try_from(status.as_str()).map_err(TaskRepositoryError::persistence)?,
        attempt: u32::try_from(attempt).map_err(TaskRepositoryError::persistence)?,
        max_attempts: u32::try_from(max_attempts).map_err(TaskRepositoryError::persistence)?,
        next_run_at,
        last_error,
        result,
        provider_request_id,
        started_at,
        completed_at,
        duration_ms,
        created_at,
        updated_at,
    };
    Ok(QueueTask::from_persisted(data))
}
