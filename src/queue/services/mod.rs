//! Application services for queueing and processing SIM tasks.

mod handlers;
mod queue;
mod worker;

pub use handlers::{HandlerError, HandlerOutcome, HandlerResult, TaskHandlers};
pub use queue::{
    BatchCreated, CreateTaskRequest, DEFAULT_MAX_ATTEMPTS, QueuePolicy, QueueService,
    QueueServiceError, QueueServiceResult, USER_TASK_LIMIT,
};
pub use worker::{
    RecoveryReport, TaskDisposition, Worker, WorkerDependencies, WorkerSettings, recover_tasks,
};
