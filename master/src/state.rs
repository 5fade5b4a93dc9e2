// master/src/state.rs

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{
    Dag, JobId, JobInfo, JobOutcome, JobResult, JobStatus, TaskId, TaskStatus, WorkerId,
    WorkerPool,
};
use tokio::sync::oneshot;

use crate::tracker::CompletionTracker;

/// Everything the scheduler mutates. Lives behind a single mutex so the
/// readiness scan, worker assignment and completion handling never
/// interleave.
pub struct SchedulerState {
    pub jobs: HashMap<JobId, JobRun>,
    pub pool: WorkerPool,
    next_seq: u64,
}

impl SchedulerState {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            jobs: HashMap::new(),
            pool,
            next_seq: 0,
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

pub struct JobRun {
    pub dag: Dag,
    /// Submission order, used as the last scheduling tie-break.
    pub seq: u64,
    pub submitted_at: DateTime<Utc>,
    pub cancelled: bool,
    pub tracker: CompletionTracker,
    pub result_tx: Option<oneshot::Sender<JobResult>>,
    pub result: Option<JobResult>,
    pub settled_at: Option<Instant>,
    /// Tasks whose work is still executing on a worker, including tasks of a
    /// cancelled job that were allowed to run to the end.
    pub in_flight: HashMap<TaskId, WorkerId>,
}

impl JobRun {
    pub fn new(dag: Dag, seq: u64, result_tx: oneshot::Sender<JobResult>) -> Self {
        Self {
            dag,
            seq,
            submitted_at: Utc::now(),
            cancelled: false,
            tracker: CompletionTracker::new(),
            result_tx: Some(result_tx),
            result: None,
            settled_at: None,
            in_flight: HashMap::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match &self.result {
            Some(r) if r.cancelled => JobStatus::Cancelled,
            Some(r) => match r.outcome {
                JobOutcome::Success => JobStatus::Succeeded,
                JobOutcome::PartialSuccess => JobStatus::PartiallySucceeded,
                JobOutcome::Failure => JobStatus::Failed,
            },
            None if self.cancelled => JobStatus::Cancelled,
            None if self.dag.tasks().iter().any(|t| t.started_at.is_some()) => {
                JobStatus::Running
            }
            None => JobStatus::Accepted,
        }
    }

    pub fn info(&self) -> JobInfo {
        let count = |s: TaskStatus| self.dag.count(s) as u32;
        JobInfo {
            id: self.dag.job_id.clone(),
            status: self.status(),
            variants: self.dag.variants.clone(),
            submitted_at: self.submitted_at,
            started_at: self.dag.tasks().iter().filter_map(|t| t.started_at).min(),
            finished_at: self.result.as_ref().map(|r| r.finished_at),
            total_tasks: self.dag.len() as u32,
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            skipped_tasks: count(TaskStatus::Skipped),
            tasks: self.dag.tasks().to_vec(),
        }
    }
}
