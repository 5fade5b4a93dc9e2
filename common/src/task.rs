use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::job::JobId;
use crate::storage::BlobRef;
use crate::worker::WorkerId;

pub type TaskId = String;

/// Kind of work a task performs. Per-type behaviour lives in [`TaskProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Split = 0,
    VideoEncode = 1,
    AudioEncode = 2,
    Thumbnail = 3,
    Watermark = 4,
    Merge = 5,
    Inspection = 6,
}

/// Static per-type behaviour.
#[derive(Debug, Clone, Copy)]
pub struct TaskProfile {
    pub task_type: TaskType,
    pub label: &'static str,
    /// Later pipeline stages drain first once unblocked.
    pub default_priority: i32,
    /// Nominal wall time used by the simulated executor.
    pub simulated_ms: u64,
}

// Indexed by the enum discriminant.
const PROFILES: [TaskProfile; 7] = [
    TaskProfile {
        task_type: TaskType::Split,
        label: "SPLIT",
        default_priority: 10,
        simulated_ms: 800,
    },
    TaskProfile {
        task_type: TaskType::VideoEncode,
        label: "VIDEO_ENCODE",
        default_priority: 40,
        simulated_ms: 3_000,
    },
    TaskProfile {
        task_type: TaskType::AudioEncode,
        label: "AUDIO_ENCODE",
        default_priority: 30,
        simulated_ms: 1_200,
    },
    TaskProfile {
        task_type: TaskType::Thumbnail,
        label: "THUMBNAIL",
        default_priority: 20,
        simulated_ms: 300,
    },
    TaskProfile {
        task_type: TaskType::Watermark,
        label: "WATERMARK",
        default_priority: 35,
        simulated_ms: 1_000,
    },
    TaskProfile {
        task_type: TaskType::Merge,
        label: "MERGE",
        default_priority: 50,
        simulated_ms: 600,
    },
    TaskProfile {
        task_type: TaskType::Inspection,
        label: "INSPECTION",
        default_priority: 15,
        simulated_ms: 400,
    },
];

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Split,
        TaskType::VideoEncode,
        TaskType::AudioEncode,
        TaskType::Thumbnail,
        TaskType::Watermark,
        TaskType::Merge,
        TaskType::Inspection,
    ];

    pub fn profile(self) -> &'static TaskProfile {
        &PROFILES[self as usize]
    }

    pub fn default_priority(self) -> i32 {
        self.profile().default_priority
    }

    pub fn as_str(self) -> &'static str {
        self.profile().label
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    /// Accepts `VIDEO_ENCODE`, `video_encode` or `video-encode`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| Error::config(format!("unknown task type '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, Ready) => true,
            (Ready, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            // ResourceExhausted is detected while the task is still READY.
            (Ready, Failed) => true,
            (from, Skipped) => !from.is_final(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,
    /// Resolution label such as `720p`; set on VIDEO_ENCODE and MERGE.
    pub target_variant: Option<String>,
    pub priority: i32,
    pub status: TaskStatus,

    /// Declared external input (only SPLIT reads from the raw store directly).
    pub input_ref: Option<BlobRef>,
    pub output_ref: Option<BlobRef>,
    /// Slot that ran (or is running) the task.
    pub worker_id: Option<WorkerId>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

impl Task {
    pub fn new(
        job_id: &JobId,
        id: impl Into<TaskId>,
        task_type: TaskType,
        target_variant: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.clone(),
            task_type,
            target_variant,
            priority: task_type.default_priority(),
            status: TaskStatus::Pending,
            input_ref: None,
            output_ref: None,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_detail: None,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        self.status = to;
        true
    }

    pub fn mark_ready(&mut self) -> bool {
        self.transition(TaskStatus::Ready)
    }

    pub fn mark_running(&mut self, worker_id: &WorkerId) -> bool {
        if !self.transition(TaskStatus::Running) {
            return false;
        }
        self.worker_id = Some(worker_id.clone());
        self.started_at = Some(Utc::now());
        true
    }

    pub fn mark_completed(&mut self, output_ref: BlobRef) -> bool {
        if !self.transition(TaskStatus::Completed) {
            return false;
        }
        self.output_ref = Some(output_ref);
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn mark_failed(&mut self, detail: impl Into<String>) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.error_detail = Some(detail.into());
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn mark_skipped(&mut self) -> bool {
        if !self.transition(TaskStatus::Skipped) {
            return false;
        }
        self.completed_at = Some(Utc::now());
        true
    }
}
