//! Error taxonomy shared by the builder, the pool and the scheduler.

use thiserror::Error;

use crate::job::JobId;
use crate::task::TaskType;
use crate::worker::WorkerId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The processing plan was rejected before any job was created.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A task's work reported failure (or timed out).
    #[error("task execution failed: {0}")]
    TaskExecutionFailure(String),

    /// No slot in the whole pool can ever run this task type.
    #[error("resource exhausted: no worker in the pool can run {task_type} tasks")]
    ResourceExhausted { task_type: TaskType },

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("job {0} was already submitted")]
    DuplicateJob(JobId),

    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),

    #[error("worker {0} is busy")]
    WorkerBusy(WorkerId),

    /// The scheduler went away before the job result was delivered.
    #[error("scheduler closed before job {0} finished")]
    SchedulerClosed(JobId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskExecutionFailure(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
