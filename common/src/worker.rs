use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::TaskType;

pub type WorkerId = String;

/// Which task types a slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Specialization {
    /// Overflow slot, runs any task type.
    General,
    Only(TaskType),
}

impl Specialization {
    pub fn can_run(self, task_type: TaskType) -> bool {
        match self {
            Specialization::General => true,
            Specialization::Only(t) => t == task_type,
        }
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specialization::General => f.write_str("general"),
            Specialization::Only(t) => f.write_str(&t.as_str().to_ascii_lowercase()),
        }
    }
}

impl FromStr for Specialization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("general") {
            return Ok(Specialization::General);
        }
        s.parse::<TaskType>().map(Specialization::Only)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub specialization: Specialization,
    pub busy: bool,

    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_task_time_ms: u64,
}

impl Worker {
    pub fn new(id: impl Into<WorkerId>, specialization: Specialization) -> Self {
        Self {
            id: id.into(),
            specialization,
            busy: false,
            tasks_started: 0,
            tasks_succeeded: 0,
            tasks_failed: 0,
            total_task_time_ms: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerMetrics {
    pub worker_id: WorkerId,
    pub specialization: String,
    pub busy: bool,
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub avg_task_ms: Option<f64>,
}

/// Fixed set of execution slots shared by every job of a scheduler.
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Worker>) -> Self {
        Self { workers }
    }

    /// `[(General, 2), (Only(Merge), 1)]` -> `general-0, general-1, merge-0`.
    /// Numbering continues when a specialization is listed twice.
    pub fn with_slots(slots: &[(Specialization, usize)]) -> Self {
        let mut next: HashMap<Specialization, usize> = HashMap::new();
        let mut workers = Vec::new();
        for (spec, n) in slots {
            let first = next.entry(*spec).or_default();
            for i in *first..*first + n {
                workers.push(Worker::new(format!("{spec}-{i}"), *spec));
            }
            *first += n;
        }
        Self { workers }
    }

    /// Parses `"video_encode=2,audio_encode=1,general=2"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut slots = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, count) = part
                .split_once('=')
                .ok_or_else(|| Error::config(format!("pool entry '{part}' must be NAME=COUNT")))?;
            let specialization: Specialization = name.parse()?;
            if slots.iter().any(|(s, _)| *s == specialization) {
                return Err(Error::config(format!(
                    "pool entry '{}' listed more than once",
                    name.trim()
                )));
            }
            let count: usize = count
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("bad worker count in '{part}'")))?;
            slots.push((specialization, count));
        }
        Ok(Self::with_slots(&slots))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn get(&self, id: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Worker> {
        self.workers
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| Error::UnknownWorker(id.to_string()))
    }

    /// Specialized slots first; general slots are overflow capacity.
    pub fn find_capable_free_worker(&self, task_type: TaskType) -> Option<WorkerId> {
        let free = || self.workers.iter().filter(|w| !w.busy);
        free()
            .find(|w| w.specialization == Specialization::Only(task_type))
            .or_else(|| free().find(|w| w.specialization == Specialization::General))
            .map(|w| w.id.clone())
    }

    /// Whether any slot, busy or not, could ever run this type.
    pub fn has_capable_worker(&self, task_type: TaskType) -> bool {
        self.workers.iter().any(|w| w.specialization.can_run(task_type))
    }

    pub fn has_free_worker(&self) -> bool {
        self.workers.iter().any(|w| !w.busy)
    }

    pub fn acquire(&mut self, id: &str) -> Result<()> {
        let worker = self.get_mut(id)?;
        if worker.busy {
            return Err(Error::WorkerBusy(worker.id.clone()));
        }
        worker.busy = true;
        worker.tasks_started += 1;
        Ok(())
    }

    pub fn release(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.busy = false;
        Ok(())
    }

    pub fn record_outcome(&mut self, id: &str, success: bool, elapsed_ms: u64) -> Result<()> {
        let worker = self.get_mut(id)?;
        worker.total_task_time_ms += elapsed_ms;
        if success {
            worker.tasks_succeeded += 1;
        } else {
            worker.tasks_failed += 1;
        }
        Ok(())
    }

    pub fn metrics(&self) -> Vec<WorkerMetrics> {
        self.workers
            .iter()
            .map(|w| {
                let finished = w.tasks_succeeded + w.tasks_failed;
                WorkerMetrics {
                    worker_id: w.id.clone(),
                    specialization: w.specialization.to_string(),
                    busy: w.busy,
                    tasks_started: w.tasks_started,
                    tasks_succeeded: w.tasks_succeeded,
                    tasks_failed: w.tasks_failed,
                    avg_task_ms: (finished > 0)
                        .then(|| w.total_task_time_ms as f64 / finished as f64),
                }
            })
            .collect()
    }
}
