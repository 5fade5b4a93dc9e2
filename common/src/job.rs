use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::BlobRef;
use crate::task::Task;

pub type JobId = String;

pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// What the DAG builder knows about the uploaded source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    /// Handle of the raw upload in the raw-video store.
    pub source_ref: BlobRef,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub duration_secs: f64,
}

/// Height encoded in a resolution label: `"720p"` -> 720.
///
/// Only plain decimal digits without a leading zero are accepted, so every
/// height has exactly one label.
pub fn variant_height(label: &str) -> Option<u32> {
    let digits = label.trim().strip_suffix(['p', 'P'])?;
    let canonical = !digits.starts_with('0') && digits.bytes().all(|b| b.is_ascii_digit());
    if digits.is_empty() || !canonical {
        return None;
    }
    digits.parse::<u32>().ok()
}

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub source: SourceDescriptor,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Accepted,
    Running,
    Succeeded,
    PartiallySucceeded,
    Failed,
    Cancelled,
}

/// Point-in-time view of one job, as served by the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub status: JobStatus,
    pub variants: Vec<String>,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub skipped_tasks: u32,

    pub tasks: Vec<Task>,
}
