//! Resource manager: matches ready tasks to capable free workers in priority
//! order, runs them off the critical section and folds their outcomes back
//! into the owning job's DAG.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use common::{
    BlobRef, Dag, Error, JobId, JobInfo, JobResult, Result, TaskId, TaskStatus, TaskType,
    WorkerId, WorkerMetrics, WorkerPool,
};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::executor::{TaskExecutor, TaskRun};
use crate::state::{JobRun, SchedulerState};
use crate::tracker::CompletionEvent;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on a single task's execution.
    pub task_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(600),
            event_capacity: 256,
        }
    }
}

/// Returned by [`Scheduler::submit`]; resolves to the job's terminal result.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    result: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn wait(self) -> Result<JobResult> {
        self.result
            .await
            .map_err(|_| Error::SchedulerClosed(self.job_id))
    }
}

struct Dispatch {
    job_id: JobId,
    task_id: TaskId,
    worker_id: WorkerId,
    run: TaskRun,
}

struct Settled {
    job_id: JobId,
    result: JobResult,
    tx: Option<oneshot::Sender<JobResult>>,
}

#[derive(Default)]
struct Tick {
    dispatches: Vec<Dispatch>,
    settled: Vec<Settled>,
}

struct Inner<E> {
    state: Mutex<SchedulerState>,
    executor: E,
    config: SchedulerConfig,
    events: broadcast::Sender<CompletionEvent>,
}

/// Cheap to clone; all clones drive the same state.
///
/// `submit`, `cancel` and task completion spawn onto the ambient tokio
/// runtime, so they must be called from inside one.
pub struct Scheduler<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for Scheduler<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: TaskExecutor> Scheduler<E> {
    pub fn new(pool: WorkerPool, executor: E, config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!("scheduler started with {} workers", pool.len());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::new(pool)),
                executor,
                config,
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stream of `(job_id, result)` pairs, one per job.
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.inner.events.subscribe()
    }

    /// Takes ownership of a built DAG and starts scheduling it. Never blocks.
    pub fn submit(&self, dag: Dag) -> Result<JobHandle> {
        if dag.is_empty() {
            return Err(Error::invalid_plan(format!("job {} has no tasks", dag.job_id)));
        }
        let job_id = dag.job_id.clone();
        let (tx, rx) = oneshot::channel();

        let tick = {
            let mut state = self.lock();
            if state.jobs.contains_key(&job_id) {
                return Err(Error::DuplicateJob(job_id));
            }
            let seq = state.next_seq();
            info!(
                "job {} submitted: {} tasks, variants {:?}",
                job_id,
                dag.len(),
                dag.variants
            );
            state.jobs.insert(job_id.clone(), JobRun::new(dag, seq, tx));
            self.tick(&mut state)
        };
        self.apply(tick);

        Ok(JobHandle { job_id, result: rx })
    }

    /// Best-effort cooperative cancellation. Unfinished tasks become SKIPPED;
    /// tasks already running finish on their worker and their result is
    /// discarded.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let tick = {
            let mut state = self.lock();
            let run = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| Error::UnknownJob(job_id.to_string()))?;
            if run.tracker.is_emitted() {
                debug!("cancel for job {} ignored, already finished", job_id);
                return Ok(());
            }
            run.cancelled = true;
            let skipped = run.dag.skip_unfinished();
            warn!(
                "job {} cancelled: {} tasks skipped, {} still running on workers",
                job_id,
                skipped.len(),
                run.in_flight.len()
            );
            self.tick(&mut state)
        };
        self.apply(tick);
        Ok(())
    }

    pub fn job_info(&self, job_id: &str) -> Option<JobInfo> {
        self.lock().jobs.get(job_id).map(JobRun::info)
    }

    pub fn job_result(&self, job_id: &str) -> Option<JobResult> {
        self.lock().jobs.get(job_id).and_then(|r| r.result.clone())
    }

    pub fn worker_metrics(&self) -> Vec<WorkerMetrics> {
        self.lock().pool.metrics()
    }

    /// Drops finished jobs that settled more than `retention` ago and have
    /// nothing left executing on a worker.
    pub fn evict_finished(&self, retention: Duration) -> Vec<JobId> {
        let mut state = self.lock();
        let expired: Vec<JobId> = state
            .jobs
            .iter()
            .filter(|(_, run)| run.in_flight.is_empty())
            .filter(|(_, run)| {
                run.settled_at
                    .map(|at| at.elapsed() >= retention)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.jobs.remove(id);
        }
        expired
    }

    /// Readiness scan + dispatch. Must run under the state lock.
    fn tick(&self, state: &mut SchedulerState) -> Tick {
        let mut tick = Tick::default();

        for run in state.jobs.values_mut().filter(|r| !r.cancelled) {
            run.dag.promote_ready();
        }

        let mut ready: Vec<_> = state
            .jobs
            .values()
            .filter(|r| !r.cancelled)
            .flat_map(|r| {
                r.dag
                    .tasks()
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.status == TaskStatus::Ready)
                    .map(move |(idx, t)| {
                        (
                            (Reverse(t.priority), t.created_at, r.seq, idx),
                            r.dag.job_id.clone(),
                            t.id.clone(),
                            t.task_type,
                        )
                    })
            })
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));

        // A type that found no free worker stays blocked for the rest of the
        // pass so lower-priority tasks of that type cannot jump the queue.
        let mut blocked: HashSet<TaskType> = HashSet::new();

        for (_, job_id, task_id, task_type) in ready {
            if blocked.contains(&task_type) {
                continue;
            }
            let Some(run) = state.jobs.get_mut(&job_id) else {
                continue;
            };

            if !state.pool.has_capable_worker(task_type) {
                let err = Error::ResourceExhausted { task_type };
                if let Some(task) = run.dag.task_mut(&task_id) {
                    task.mark_failed(err.to_string());
                }
                let skipped = run.dag.skip_dependents(&task_id);
                warn!(
                    "task {} of job {} failed: {} ({} dependents skipped)",
                    task_id,
                    job_id,
                    err,
                    skipped.len()
                );
                continue;
            }

            let Some(worker_id) = state.pool.find_capable_free_worker(task_type) else {
                blocked.insert(task_type);
                continue;
            };

            debug_assert!(run.dag.prerequisites_completed(&task_id));
            if let Err(e) = state.pool.acquire(&worker_id) {
                warn!("could not acquire worker {}: {}", worker_id, e);
                blocked.insert(task_type);
                continue;
            }

            let inputs = Self::inputs_for(&run.dag, &task_id);
            let Some(task) = run.dag.task_mut(&task_id) else {
                continue;
            };
            task.mark_running(&worker_id);
            run.in_flight.insert(task_id.clone(), worker_id.clone());
            debug!(
                "dispatching {} of job {} (priority {}) to worker {}",
                task_id, job_id, task.priority, worker_id
            );

            tick.dispatches.push(Dispatch {
                run: TaskRun {
                    job_id: job_id.clone(),
                    task_id: task_id.clone(),
                    task_type,
                    target_variant: task.target_variant.clone(),
                    worker_id: worker_id.clone(),
                    inputs,
                },
                job_id,
                task_id,
                worker_id,
            });
        }

        for run in state.jobs.values_mut() {
            if let Some(result) = run.tracker.observe(&run.dag, run.cancelled) {
                run.result = Some(result.clone());
                run.settled_at = Some(Instant::now());
                tick.settled.push(Settled {
                    job_id: run.dag.job_id.clone(),
                    result,
                    tx: run.result_tx.take(),
                });
            }
        }

        tick
    }

    fn inputs_for(dag: &Dag, task_id: &str) -> Vec<BlobRef> {
        if let Some(input) = dag.task(task_id).and_then(|t| t.input_ref.clone()) {
            return vec![input];
        }
        dag.prerequisites(task_id)
            .filter_map(|p| dag.task(p).and_then(|t| t.output_ref.clone()))
            .collect()
    }

    /// Runs outside the lock: publishes results, then launches work.
    fn apply(&self, tick: Tick) {
        for settled in tick.settled {
            info!(
                "job {} finished: {:?}, produced {:?}, {} failures",
                settled.job_id,
                settled.result.outcome,
                settled.result.produced_variants,
                settled.result.failures.len()
            );
            if let Some(tx) = settled.tx {
                let _ = tx.send(settled.result.clone());
            }
            let _ = self.inner.events.send(CompletionEvent {
                job_id: settled.job_id,
                result: settled.result,
            });
        }

        for dispatch in tick.dispatches {
            self.launch(dispatch);
        }
    }

    fn launch(&self, dispatch: Dispatch) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let timeout = scheduler.inner.config.task_timeout;

            // Nested spawn so a panicking execution body still reports back.
            let inner = Arc::clone(&scheduler.inner);
            let run = dispatch.run;
            let work = tokio::spawn(async move {
                tokio::time::timeout(timeout, inner.executor.execute(run)).await
            });

            let outcome = match work.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(Error::task_failed(format!("timed out after {timeout:?}"))),
                Err(e) => Err(Error::task_failed(format!("execution aborted: {e}"))),
            };

            scheduler.finish(
                &dispatch.job_id,
                &dispatch.task_id,
                &dispatch.worker_id,
                outcome,
                started.elapsed(),
            );
        });
    }

    /// Completion callback for one task execution.
    fn finish(
        &self,
        job_id: &str,
        task_id: &str,
        worker_id: &str,
        outcome: Result<BlobRef>,
        elapsed: Duration,
    ) {
        let tick = {
            let mut state = self.lock();
            let state = &mut *state;

            if let Err(e) = state.pool.release(worker_id) {
                warn!("releasing worker {}: {}", worker_id, e);
            }
            let _ = state
                .pool
                .record_outcome(worker_id, outcome.is_ok(), elapsed.as_millis() as u64);

            match state.jobs.get_mut(job_id) {
                None => warn!("result of {} for unknown job {} discarded", task_id, job_id),
                Some(run) => {
                    run.in_flight.remove(task_id);
                    Self::record_outcome(run, task_id, outcome);
                }
            }

            self.tick(state)
        };
        self.apply(tick);
    }

    fn record_outcome(run: &mut JobRun, task_id: &str, outcome: Result<BlobRef>) {
        let job_id = run.dag.job_id.clone();
        let running = run
            .dag
            .task(task_id)
            .map(|t| t.status == TaskStatus::Running)
            .unwrap_or(false);
        if run.cancelled || !running {
            warn!(
                "discarding result of {} for job {} (cancelled or no longer running)",
                task_id, job_id
            );
            return;
        }
        let Some(task) = run.dag.task_mut(task_id) else {
            return;
        };

        match outcome {
            Ok(output_ref) => {
                task.mark_completed(output_ref);
                info!("task {} of job {} completed", task_id, job_id);
            }
            Err(err) => {
                task.mark_failed(err.to_string());
                let skipped = run.dag.skip_dependents(task_id);
                warn!(
                    "task {} of job {} failed: {}; skipped {:?}",
                    task_id, job_id, err, skipped
                );
            }
        }
    }
}
