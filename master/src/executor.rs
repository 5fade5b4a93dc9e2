//! Task execution bodies. The scheduler treats a task's work as an opaque,
//! time-bounded future that yields an output ref or an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{BlobRef, BlobStore, Error, JobId, Result, TaskId, TaskType, WorkerId};
use tracing::debug;

/// Everything an execution body needs to know about one dispatched task.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub target_variant: Option<String>,
    pub worker_id: WorkerId,
    /// Declared input for SPLIT, prerequisite outputs for everything else.
    pub inputs: Vec<BlobRef>,
}

pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, run: TaskRun) -> impl Future<Output = Result<BlobRef>> + Send;
}

/// Forces failures for matching tasks, e.g. `VIDEO_ENCODE:720p` or `SPLIT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailRule {
    pub task_type: TaskType,
    pub variant: Option<String>,
}

impl FailRule {
    pub fn matches(&self, run: &TaskRun) -> bool {
        self.task_type == run.task_type
            && match &self.variant {
                Some(v) => run.target_variant.as_deref() == Some(v.as_str()),
                None => true,
            }
    }

    /// Parses a comma separated list of `TYPE[:variant]`.
    pub fn parse_list(spec: &str) -> Result<Vec<FailRule>> {
        spec.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|part| {
                let (ty, variant) = match part.split_once(':') {
                    Some((ty, v)) => (ty, Some(v.trim().to_ascii_lowercase())),
                    None => (part, None),
                };
                Ok(FailRule {
                    task_type: ty.parse()?,
                    variant,
                })
            })
            .collect()
    }
}

/// Stand-in for real media work: reads inputs from the blob store, sleeps
/// for the type's nominal duration and stores a synthetic output.
pub struct SimulatedExecutor {
    store: Arc<dyn BlobStore>,
    time_scale: f64,
    fail_on: Vec<FailRule>,
}

impl SimulatedExecutor {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            time_scale: 1.0,
            fail_on: Vec::new(),
        }
    }

    /// 0.0 makes every task finish immediately.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    pub fn with_failures(mut self, rules: Vec<FailRule>) -> Self {
        self.fail_on = rules;
        self
    }

    fn duration_for(&self, task_type: TaskType) -> Duration {
        let ms = task_type.profile().simulated_ms as f64 * self.time_scale;
        Duration::from_millis(ms as u64)
    }
}

impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, run: TaskRun) -> Result<BlobRef> {
        let mut input_bytes = 0usize;
        for input in &run.inputs {
            input_bytes += self.store.fetch(input)?.len();
        }

        let work = self.duration_for(run.task_type);
        debug!(
            "worker {} simulating {} ({}) for {:?}",
            run.worker_id, run.task_id, run.job_id, work
        );
        tokio::time::sleep(work).await;

        if self.fail_on.iter().any(|r| r.matches(&run)) {
            return Err(Error::task_failed(format!(
                "{} failed on worker {}",
                run.task_id, run.worker_id
            )));
        }

        let payload = format!(
            "{}|{}|{}|in={}",
            run.job_id,
            run.task_type,
            run.target_variant.as_deref().unwrap_or("-"),
            input_bytes
        );
        self.store.store(payload.into_bytes())
    }
}
