use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{Dag, THUMBNAIL_ID};
use crate::job::JobId;
use crate::storage::BlobRef;
use crate::task::{TaskId, TaskStatus, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Success,
    PartialSuccess,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub error_detail: String,
}

/// Terminal result of a job, emitted once by the completion tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    /// Variants whose MERGE completed, in request order.
    pub produced_variants: Vec<String>,
    pub missing_variants: Vec<String>,
    /// Output of each produced variant's MERGE, same order as `produced_variants`.
    pub rendition_refs: Vec<BlobRef>,
    pub thumbnail_ref: Option<BlobRef>,
    pub failures: Vec<TaskFailure>,
    pub cancelled: bool,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// Summarizes a settled DAG.
    ///
    /// Each terminal task is an independent unit: all of them completing is
    /// a success, at least one rendition completing is a partial success,
    /// and no rendition at all is a failure even if the thumbnail made it.
    pub fn from_dag(dag: &Dag, cancelled: bool) -> Self {
        let mut produced_variants = Vec::new();
        let mut missing_variants = Vec::new();
        let mut rendition_refs = Vec::new();

        for variant in &dag.variants {
            let merge = dag.terminal_tasks().find(|t| {
                t.task_type == TaskType::Merge
                    && t.target_variant.as_deref() == Some(variant.as_str())
            });
            match merge {
                Some(t) if t.status == TaskStatus::Completed => {
                    produced_variants.push(variant.clone());
                    rendition_refs.extend(t.output_ref.clone());
                }
                _ => missing_variants.push(variant.clone()),
            }
        }

        let thumbnail_ref = dag
            .task(THUMBNAIL_ID)
            .filter(|t| t.status == TaskStatus::Completed)
            .and_then(|t| t.output_ref.clone());

        let failures = dag
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| TaskFailure {
                task_id: t.id.clone(),
                error_detail: t.error_detail.clone().unwrap_or_default(),
            })
            .collect();

        let all_terminals_completed = dag
            .terminal_tasks()
            .all(|t| t.status == TaskStatus::Completed);

        let outcome = if all_terminals_completed && !cancelled {
            JobOutcome::Success
        } else if produced_variants.is_empty() {
            JobOutcome::Failure
        } else {
            JobOutcome::PartialSuccess
        };

        JobResult {
            job_id: dag.job_id.clone(),
            outcome,
            produced_variants,
            missing_variants,
            rendition_refs,
            thumbnail_ref,
            failures,
            cancelled,
            finished_at: Utc::now(),
        }
    }
}
