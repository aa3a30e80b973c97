//! In-memory task store for tests and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::queue::{
    domain::{
        BatchId, NewQueueTask, QueueTask, RequestId, StatusCounts, TaskId, TaskStatus, TaskUpdate,
        TransitionGuard, UserId,
    },
    ports::{TaskRepository, TaskRepositoryError, TaskRepositoryResult},
};

/// Thread-safe in-memory task repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    state: Arc<RwLock<InMemoryTaskState>>,
}

#[derive(Debug, Default)]
struct InMemoryTaskState {
    tasks: BTreeMap<TaskId, QueueTask>,
    request_index: HashMap<RequestId, TaskId>,
    last_id: i64,
}

impl InMemoryTaskState {
    fn insert(&mut self, task: NewQueueTask) -> QueueTask {
        self.last_id += 1;
        let id = TaskId::new(self.last_id);
        let stored = QueueTask::from_new(id, task);
        self.request_index.insert(stored.request_id(), id);
        self.tasks.insert(id, stored.clone());
        stored
    }
}

impl InMemoryTaskRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored task ordered by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::Persistence`] when the lock is poisoned.
    pub fn snapshot(&self) -> TaskRepositoryResult<Vec<QueueTask>> {
        Ok(self.read()?.tasks.values().cloned().collect())
    }

    fn read(&self) -> TaskRepositoryResult<RwLockReadGuard<'_, InMemoryTaskState>> {
        self.state.read().map_err(|err| {
            TaskRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }

    fn write(&self) -> TaskRepositoryResult<RwLockWriteGuard<'_, InMemoryTaskState>> {
        self.state.write().map_err(|err| {
            TaskRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: NewQueueTask) -> TaskRepositoryResult<QueueTask> {
        let mut state = self.write()?;
        if state.request_index.contains_key(&task.request_id) {
            return Err(TaskRepositoryError::DuplicateRequestId(task.request_id));
        }
        Ok(state.insert(task))
    }

    async fn insert_batch(&self, tasks: Vec<NewQueueTask>) -> TaskRepositoryResult<Vec<QueueTask>> {
        let mut state = self.write()?;
        let mut seen = Vec::with_capacity(tasks.len());
        for task in &tasks {
            if state.request_index.contains_key(&task.request_id) || seen.contains(&task.request_id)
            {
                return Err(TaskRepositoryError::DuplicateRequestId(task.request_id));
            }
            seen.push(task.request_id);
        }
        Ok(tasks.into_iter().map(|task| state.insert(task)).collect())
    }

    async fn find_by_id(&self, id: TaskId) -> TaskRepositoryResult<Option<QueueTask>> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    async fn find_by_request_id(
        &self,
        request_id: RequestId,
    ) -> TaskRepositoryResult<Option<QueueTask>> {
        let state = self.read()?;
        Ok(state
            .request_index
            .get(&request_id)
            .and_then(|id| state.tasks.get(id))
            .cloned())
    }

    async fn find_by_user(
        &self,
        user: UserId,
        statuses: &[TaskStatus],
        limit: usize,
    ) -> TaskRepositoryResult<Vec<QueueTask>> {
        let state = self.read()?;
        let mut tasks: Vec<QueueTask> = state
            .tasks
            .values()
            .filter(|task| task.requester().user_id == Some(user))
            .filter(|task| statuses.is_empty() || statuses.contains(&task.status()))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn find_by_batch(&self, batch: BatchId) -> TaskRepositoryResult<Vec<QueueTask>> {
        let state = self.read()?;
        let mut tasks: Vec<QueueTask> = state
            .tasks
            .values()
            .filter(|task| task.batch().is_some_and(|member| member.batch_id == batch))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.batch().map_or(0, |member| member.index));
        Ok(tasks)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskRepositoryResult<Vec<QueueTask>> {
        let state = self.read()?;
        let mut tasks: Vec<QueueTask> = state
            .tasks
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.created_at().cmp(&b.created_at()))
                .then_with(|| a.id().cmp(&b.id()))
        });
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn transition(
        &self,
        id: TaskId,
        guard: &TransitionGuard,
        update: &TaskUpdate,
    ) -> TaskRepositoryResult<bool> {
        let mut state = self.write()?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !guard.matches(task.status(), task.requester().user_id) {
            return Ok(false);
        }
        task.apply(update);
        Ok(true)
    }

    async fn recover_processing(&self, now: DateTime<Utc>) -> TaskRepositoryResult<u64> {
        let mut state = self.write()?;
        let update = TaskUpdate::recover(now);
        let mut moved = 0;
        for task in state
            .tasks
            .values_mut()
            .filter(|task| task.status() == TaskStatus::Processing)
        {
            task.apply(&update);
            moved += 1;
        }
        Ok(moved)
    }

    async fn fail_exhausted(&self, now: DateTime<Utc>, message: &str) -> TaskRepositoryResult<u64> {
        let mut state = self.write()?;
        let update = TaskUpdate::fail(message, None, now);
        let mut moved = 0;
        for task in state
            .tasks
            .values_mut()
            .filter(|task| task.status() == TaskStatus::Pending && task.attempts_exhausted())
        {
            task.apply(&update);
            moved += 1;
        }
        Ok(moved)
    }

    async fn count_by_status(&self) -> TaskRepositoryResult<StatusCounts> {
        Ok(self.read()?.tasks.values().map(QueueTask::status).collect())
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> TaskRepositoryResult<u64> {
        let count = self
            .read()?
            .tasks
            .values()
            .filter(|task| task.created_at() >= since)
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> TaskRepositoryResult<u64> {
        let mut state = self.write()?;
        let expired: Vec<(TaskId, RequestId)> = state
            .tasks
            .values()
            .filter(|task| task.status().is_terminal())
            .filter(|task| task.completed_at().is_some_and(|at| at < cutoff))
            .map(|task| (task.id(), task.request_id()))
            .collect();
        for (id, request_id) in &expired {
            state.tasks.remove(id);
            state.request_index.remove(request_id);
        }
        Ok(u64::try_from(expired.len()).unwrap_or(u64::MAX))
    }
}
