use common::{Dag, JobId, JobResult};

/// One `(job_id, result)` pair on the completion stream.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub job_id: JobId,
    pub result: JobResult,
}

/// Per-job completion tracker.
///
/// `observe` is called after every status change of the job's DAG. It
/// yields the job result exactly once, the first time the DAG is settled
/// (no task PENDING, READY or RUNNING).
#[derive(Debug, Default)]
pub struct CompletionTracker {
    emitted: bool,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_emitted(&self) -> bool {
        self.emitted
    }

    pub fn observe(&mut self, dag: &Dag, cancelled: bool) -> Option<JobResult> {
        if self.emitted || !dag.is_settled() {
            return None;
        }
        self.emitted = true;
        Some(JobResult::from_dag(dag, cancelled))
    }
}
