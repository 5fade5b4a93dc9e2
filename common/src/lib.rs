//! Shared model of the transcode scheduler: tasks, the per-job DAG and its
//! builder, the worker pool, job results and the narrow store interfaces.

pub mod dag;
pub mod error;
pub mod job;
pub mod results;
pub mod storage;
pub mod task;
pub mod worker;

pub use dag::{build_dag, Dag};
pub use error::{Error, Result};
pub use job::{new_job_id, JobId, JobInfo, JobRequest, JobStatus, SourceDescriptor};
pub use results::{JobOutcome, JobResult, TaskFailure};
pub use storage::{
    BlobRef, BlobStore, InMemoryBlobStore, InMemoryMetadataStore, MetadataStore,
};
pub use task::{Task, TaskId, TaskStatus, TaskType};
pub use worker::{Specialization, Worker, WorkerId, WorkerMetrics, WorkerPool};
