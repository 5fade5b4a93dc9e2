use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::{variant_height, JobId, SourceDescriptor};
use crate::task::{Task, TaskId, TaskStatus, TaskType};

/// Task graph of a single job.
///
/// Tasks can only depend on tasks that were added before them, so the
/// prerequisite relation is acyclic by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dag {
    pub job_id: JobId,
    pub variants: Vec<String>,
    tasks: Vec<Task>,
    prerequisites: BTreeMap<TaskId, BTreeSet<TaskId>>,
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl Dag {
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            variants: Vec::new(),
            tasks: Vec::new(),
            prerequisites: BTreeMap::new(),
            dependents: BTreeMap::new(),
        }
    }

    /// Adds a task whose prerequisites are already part of the graph.
    pub fn add_task(&mut self, mut task: Task, prerequisites: &[&TaskId]) -> Result<()> {
        if self.prerequisites.contains_key(&task.id) {
            return Err(Error::invalid_plan(format!("duplicate task id {}", task.id)));
        }
        for p in prerequisites {
            if !self.prerequisites.contains_key(*p) {
                return Err(Error::invalid_plan(format!(
                    "task {} depends on unknown task {}",
                    task.id, p
                )));
            }
        }

        task.job_id = self.job_id.clone();
        let id = task.id.clone();
        let prereqs: BTreeSet<TaskId> = prerequisites.iter().map(|p| (*p).clone()).collect();
        for p in &prereqs {
            self.dependents.entry(p.clone()).or_default().insert(id.clone());
        }
        self.prerequisites.insert(id.clone(), prereqs);
        self.dependents.entry(id).or_default();
        self.tasks.push(task);
        Ok(())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn prerequisites(&self, id: &str) -> impl Iterator<Item = &TaskId> {
        self.prerequisites.get(id).into_iter().flatten()
    }

    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &TaskId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Tasks nothing else depends on: one MERGE per variant plus THUMBNAIL.
    pub fn terminal_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| self.dependents(&t.id).next().is_none())
    }

    pub fn prerequisites_completed(&self, id: &str) -> bool {
        self.prerequisites(id).all(|p| {
            self.task(p)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// PENDING -> READY for every task whose prerequisites have all completed.
    pub fn promote_ready(&mut self) -> Vec<TaskId> {
        let eligible: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| self.prerequisites_completed(&t.id))
            .map(|t| t.id.clone())
            .collect();

        for id in &eligible {
            if let Some(t) = self.task_mut(id) {
                t.mark_ready();
            }
        }
        eligible
    }

    /// Marks every direct and transitive dependent of `id` as SKIPPED.
    /// Returns the ids that actually changed state.
    pub fn skip_dependents(&mut self, id: &str) -> Vec<TaskId> {
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut queue: VecDeque<TaskId> = self.dependents(id).cloned().collect();
        let mut skipped = Vec::new();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.dependents(&next).cloned());
            if let Some(t) = self.task_mut(&next) {
                if t.mark_skipped() {
                    skipped.push(next);
                }
            }
        }
        skipped
    }

    /// Cancellation: everything not yet final becomes SKIPPED.
    pub fn skip_unfinished(&mut self) -> Vec<TaskId> {
        self.tasks
            .iter_mut()
            .filter_map(|t| t.mark_skipped().then(|| t.id.clone()))
            .collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// No task is PENDING, READY or RUNNING.
    pub fn is_settled(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_final())
    }
}

pub fn video_encode_id(variant: &str) -> TaskId {
    format!("video_encode:{variant}")
}

pub fn merge_id(variant: &str) -> TaskId {
    format!("merge:{variant}")
}

pub const SPLIT_ID: &str = "split";
pub const AUDIO_ENCODE_ID: &str = "audio_encode";
pub const THUMBNAIL_ID: &str = "thumbnail";

/// Builds the fixed split -> encode -> merge graph for one transcoding job.
///
/// Fails with `InvalidPlan` when no variant is requested, a label is not a
/// `<height>p` resolution, a label is repeated, or a variant would upscale
/// the source.
pub fn build_dag(
    job_id: impl Into<JobId>,
    source: &SourceDescriptor,
    target_variants: &[String],
) -> Result<Dag> {
    let job_id = job_id.into();
    let variants = validate_variants(source, target_variants)?;

    let mut dag = Dag::new(job_id.clone());
    dag.variants = variants.clone();

    let split_id: TaskId = SPLIT_ID.to_string();
    let mut split = Task::new(&job_id, SPLIT_ID, TaskType::Split, None);
    split.input_ref = Some(source.source_ref.clone());
    dag.add_task(split, &[])?;

    for v in &variants {
        let task = Task::new(&job_id, video_encode_id(v), TaskType::VideoEncode, Some(v.clone()));
        dag.add_task(task, &[&split_id])?;
    }

    let audio_id: TaskId = AUDIO_ENCODE_ID.to_string();
    dag.add_task(
        Task::new(&job_id, AUDIO_ENCODE_ID, TaskType::AudioEncode, None),
        &[&split_id],
    )?;
    dag.add_task(
        Task::new(&job_id, THUMBNAIL_ID, TaskType::Thumbnail, None),
        &[&split_id],
    )?;

    for v in &variants {
        let video_id = video_encode_id(v);
        let task = Task::new(&job_id, merge_id(v), TaskType::Merge, Some(v.clone()));
        dag.add_task(task, &[&video_id, &audio_id])?;
    }

    debug!(
        "built DAG for job {}: {} tasks, variants {:?}",
        job_id,
        dag.len(),
        variants
    );
    Ok(dag)
}

fn validate_variants(source: &SourceDescriptor, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Err(Error::invalid_plan("no target variants requested"));
    }
    if source.height == 0 {
        return Err(Error::invalid_plan("source has zero height"));
    }
    if !source.duration_secs.is_finite() || source.duration_secs < 0.0 {
        return Err(Error::invalid_plan(format!(
            "source duration {} is not a valid length",
            source.duration_secs
        )));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(requested.len());
    for raw in requested {
        let label = raw.trim().to_ascii_lowercase();
        let height = variant_height(&label)
            .ok_or_else(|| Error::invalid_plan(format!("'{raw}' is not a resolution label")))?;
        if height > source.height {
            return Err(Error::invalid_plan(format!(
                "variant {label} exceeds source height {}p",
                source.height
            )));
        }
        if !seen.insert(label.clone()) {
            return Err(Error::invalid_plan(format!("variant {label} requested twice")));
        }
        out.push(label);
    }
    Ok(out)
}
