use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::dag::{merge_id, video_encode_id, AUDIO_ENCODE_ID, SPLIT_ID, THUMBNAIL_ID};
use common::{
    build_dag, BlobRef, Dag, Error, JobOutcome, Result, SourceDescriptor, Specialization,
    TaskStatus, TaskType, WorkerPool,
};
use master::{Scheduler, SchedulerConfig, TaskExecutor, TaskRun};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
struct Entry {
    job_id: String,
    task_id: String,
    worker_id: String,
    start: u64,
    end: Option<u64>,
}

#[derive(Default)]
struct Journal {
    clock: u64,
    entries: Vec<Entry>,
    running: HashMap<String, usize>,
    max_per_worker: usize,
}

/// Records every execution with a logical clock and can hold or fail
/// selected task types.
#[derive(Clone)]
struct ScriptedExecutor {
    journal: Arc<Mutex<Journal>>,
    fail: Vec<String>,
    hold: Vec<TaskType>,
    gate: Arc<Semaphore>,
    stall: Vec<TaskType>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            journal: Arc::default(),
            fail: Vec::new(),
            hold: Vec::new(),
            gate: Arc::new(Semaphore::new(0)),
            stall: Vec::new(),
        }
    }
}

impl ScriptedExecutor {
    fn failing(ids: &[&str]) -> Self {
        Self {
            fail: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn entries(&self) -> Vec<Entry> {
        self.journal.lock().unwrap().entries.clone()
    }

    fn started(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.task_id).collect()
    }

    fn max_per_worker(&self) -> usize {
        self.journal.lock().unwrap().max_per_worker
    }
}

impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, run: TaskRun) -> Result<BlobRef> {
        let idx = {
            let mut j = self.journal.lock().unwrap();
            j.clock += 1;
            let start = j.clock;
            let n = j.running.entry(run.worker_id.clone()).or_default();
            *n += 1;
            let n = *n;
            j.max_per_worker = j.max_per_worker.max(n);
            j.entries.push(Entry {
                job_id: run.job_id.clone(),
                task_id: run.task_id.clone(),
                worker_id: run.worker_id.clone(),
                start,
                end: None,
            });
            j.entries.len() - 1
        };

        if self.hold.contains(&run.task_type) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        if self.stall.contains(&run.task_type) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;

        {
            let mut j = self.journal.lock().unwrap();
            j.clock += 1;
            let end = j.clock;
            j.entries[idx].end = Some(end);
            if let Some(n) = j.running.get_mut(&run.worker_id) {
                *n -= 1;
            }
        }

        if self.fail.contains(&run.task_id) {
            Err(Error::task_failed(format!("{} exploded", run.task_id)))
        } else {
            Ok(format!("{}/{}", run.job_id, run.task_id))
        }
    }
}

fn source(height: u32) -> SourceDescriptor {
    SourceDescriptor {
        source_ref: "raw/upload".to_string(),
        width: height * 16 / 9,
        height,
        duration_secs: 120.0,
    }
}

fn dag(job: &str, height: u32, variants: &[&str]) -> Dag {
    let v: Vec<String> = variants.iter().map(|s| s.to_string()).collect();
    build_dag(job, &source(height), &v).unwrap()
}

fn general(n: usize) -> WorkerPool {
    WorkerPool::with_slots(&[(Specialization::General, n)])
}

fn scheduler(pool: WorkerPool, exec: ScriptedExecutor) -> Scheduler<ScriptedExecutor> {
    Scheduler::new(pool, exec, SchedulerConfig::default())
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn tasks_only_start_after_all_prerequisites_completed() {
    let exec = ScriptedExecutor::default();
    let sched = scheduler(general(4), exec.clone());
    let result = sched
        .submit(dag("order", 1080, &["360p", "720p", "1080p"]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(result.outcome, JobOutcome::Success);

    let reference = dag("order", 1080, &["360p", "720p", "1080p"]);
    let entries = exec.entries();
    assert_eq!(entries.len(), reference.len());
    let by_id: HashMap<_, _> = entries.iter().map(|e| (e.task_id.clone(), e)).collect();

    for entry in &entries {
        for prereq in reference.prerequisites(&entry.task_id) {
            let p = by_id[prereq];
            assert!(
                p.end.unwrap() < entry.start,
                "{} started before {} ended",
                entry.task_id,
                prereq
            );
        }
    }
}

#[tokio::test]
async fn one_result_per_terminal_and_one_event_per_job() {
    let exec = ScriptedExecutor::default();
    let sched = scheduler(general(3), exec);
    let mut events = sched.subscribe();

    let a = sched.submit(dag("job-a", 720, &["360p", "720p"])).unwrap();
    let b = sched.submit(dag("job-b", 720, &["480p"])).unwrap();
    let ra = a.wait().await.unwrap();
    let rb = b.wait().await.unwrap();

    // terminals are one MERGE per variant plus the THUMBNAIL
    let terminals: Vec<_> = dag("x", 720, &["360p", "720p"])
        .terminal_tasks()
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(terminals.len(), 3);
    assert!(terminals.contains(&THUMBNAIL_ID.to_string()));
    assert_eq!(ra.rendition_refs.len(), 2);
    assert!(ra.thumbnail_ref.is_some());
    assert_eq!(rb.rendition_refs, vec!["job-b/merge:480p".to_string()]);

    let mut seen = Vec::new();
    while let Ok(Ok(ev)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
        seen.push(ev.job_id);
    }
    seen.sort();
    assert_eq!(seen, vec!["job-a".to_string(), "job-b".to_string()]);
}

#[tokio::test]
async fn split_failure_fails_the_whole_job() {
    let exec = ScriptedExecutor::failing(&[SPLIT_ID]);
    let sched = scheduler(general(2), exec.clone());
    let result = sched
        .submit(dag("bad-split", 1080, &["720p", "1080p"]))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.outcome, JobOutcome::Failure);
    assert!(result.produced_variants.is_empty());
    assert_eq!(result.thumbnail_ref, None);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].task_id, SPLIT_ID);
    assert_eq!(exec.started(), vec![SPLIT_ID.to_string()]);

    let info = sched.job_info("bad-split").unwrap();
    assert_eq!(info.skipped_tasks, info.total_tasks - 1);
}

#[tokio::test]
async fn one_failed_variant_is_a_partial_success() {
    let exec = ScriptedExecutor::failing(&["video_encode:720p"]);
    let sched = scheduler(general(2), exec);
    let result = sched
        .submit(dag("partial", 720, &["360p", "720p"]))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.outcome, JobOutcome::PartialSuccess);
    assert_eq!(result.produced_variants, vec!["360p"]);
    assert_eq!(result.missing_variants, vec!["720p"]);
    assert_eq!(result.thumbnail_ref.as_deref(), Some("partial/thumbnail"));

    let info = sched.job_info("partial").unwrap();
    let status = |id: &str| info.tasks.iter().find(|t| t.id == id).unwrap().status;
    assert_eq!(status(&merge_id("720p")), TaskStatus::Skipped);
    assert_eq!(status(&merge_id("360p")), TaskStatus::Completed);
    assert_eq!(status(AUDIO_ENCODE_ID), TaskStatus::Completed);
}

#[tokio::test]
async fn missing_video_capability_exhausts_resources() {
    let pool = WorkerPool::with_slots(&[
        (Specialization::Only(TaskType::Split), 1),
        (Specialization::Only(TaskType::AudioEncode), 1),
        (Specialization::Only(TaskType::Thumbnail), 1),
        (Specialization::Only(TaskType::Merge), 1),
    ]);
    let exec = ScriptedExecutor::default();
    let sched = scheduler(pool, exec.clone());
    let result = sched
        .submit(dag("no-video", 1080, &["1080p"]))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.outcome, JobOutcome::Failure);
    assert!(result.thumbnail_ref.is_some());
    let failure = result
        .failures
        .iter()
        .find(|f| f.task_id == video_encode_id("1080p"))
        .expect("encode failure recorded");
    assert!(failure.error_detail.starts_with("resource exhausted"));
    assert!(!exec.started().contains(&video_encode_id("1080p")));
    assert!(!exec.started().contains(&merge_id("1080p")));
}

#[tokio::test]
async fn shared_pool_never_doubles_up_a_worker() {
    let pool = WorkerPool::with_slots(&[
        (Specialization::Only(TaskType::VideoEncode), 1),
        (Specialization::General, 1),
    ]);
    let exec = ScriptedExecutor::default();
    let sched = scheduler(pool, exec.clone());

    let a = sched.submit(dag("two-a", 1080, &["720p", "1080p"])).unwrap();
    let b = sched.submit(dag("two-b", 720, &["480p"])).unwrap();
    assert_eq!(a.wait().await.unwrap().outcome, JobOutcome::Success);
    assert_eq!(b.wait().await.unwrap().outcome, JobOutcome::Success);

    assert_eq!(exec.max_per_worker(), 1);
    let entries = exec.entries();
    assert!(entries
        .iter()
        .filter(|e| e.worker_id == "video_encode-0")
        .all(|e| e.task_id.starts_with("video_encode:")));
    assert!(entries.iter().any(|e| e.job_id == "two-b"));

    let metrics = sched.worker_metrics();
    assert!(metrics.iter().all(|m| !m.busy));
    let started: u64 = metrics.iter().map(|m| m.tasks_started).sum();
    assert_eq!(started as usize, entries.len());
}

#[tokio::test]
async fn single_worker_follows_priority_order() {
    let exec = ScriptedExecutor::default();
    let sched = scheduler(general(1), exec.clone());
    sched
        .submit(dag("prio", 1080, &["720p"]))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(
        exec.started(),
        vec![
            SPLIT_ID.to_string(),
            video_encode_id("720p"),
            AUDIO_ENCODE_ID.to_string(),
            merge_id("720p"),
            THUMBNAIL_ID.to_string(),
        ]
    );
}

#[tokio::test]
async fn busy_type_does_not_block_other_types() {
    let exec = ScriptedExecutor {
        hold: vec![TaskType::VideoEncode],
        ..ScriptedExecutor::default()
    };
    let pool = WorkerPool::with_slots(&[
        (Specialization::Only(TaskType::Split), 1),
        (Specialization::Only(TaskType::VideoEncode), 1),
        (Specialization::Only(TaskType::AudioEncode), 1),
        (Specialization::Only(TaskType::Thumbnail), 1),
        (Specialization::Only(TaskType::Merge), 1),
    ]);
    let sched = scheduler(pool, exec.clone());
    let handle = sched.submit(dag("mixed", 1080, &["720p", "1080p"])).unwrap();

    // the first encode holds the only encoder; the second stays READY
    wait_until(|| {
        exec.entries()
            .iter()
            .any(|e| e.task_id == THUMBNAIL_ID && e.end.is_some())
    })
    .await;
    let started = exec.started();
    assert!(started.contains(&video_encode_id("720p")));
    assert!(started.contains(&AUDIO_ENCODE_ID.to_string()));
    assert!(!started.contains(&video_encode_id("1080p")));

    let info = sched.job_info("mixed").unwrap();
    let second = info
        .tasks
        .iter()
        .find(|t| t.id == video_encode_id("1080p"))
        .unwrap();
    assert_eq!(second.status, TaskStatus::Ready);

    exec.gate.add_permits(16);
    assert_eq!(handle.wait().await.unwrap().outcome, JobOutcome::Success);
}

#[tokio::test]
async fn cancel_after_split_stops_further_dispatch() {
    let exec = ScriptedExecutor {
        hold: vec![TaskType::VideoEncode],
        ..ScriptedExecutor::default()
    };
    let pool = WorkerPool::with_slots(&[
        (Specialization::Only(TaskType::Split), 1),
        (Specialization::General, 1),
    ]);
    let sched = scheduler(pool, exec.clone());

    // pin the only general worker on another job's encode
    let blocker = sched.submit(dag("blocker", 720, &["720p"])).unwrap();
    wait_until(|| exec.started().contains(&video_encode_id("720p"))).await;

    let handle = sched.submit(dag("victim", 1080, &["720p", "1080p"])).unwrap();
    wait_until(|| {
        exec.entries()
            .iter()
            .any(|e| e.job_id == "victim" && e.task_id == SPLIT_ID && e.end.is_some())
    })
    .await;
    sched.cancel("victim").unwrap();

    let result = handle.wait().await.unwrap();
    assert!(result.cancelled);
    assert_eq!(result.outcome, JobOutcome::Failure);

    exec.gate.add_permits(16);
    assert_eq!(blocker.wait().await.unwrap().outcome, JobOutcome::Success);

    let victim_tasks: Vec<_> = exec
        .entries()
        .into_iter()
        .filter(|e| e.job_id == "victim")
        .map(|e| e.task_id)
        .collect();
    assert_eq!(victim_tasks, vec![SPLIT_ID.to_string()]);
    assert_eq!(sched.job_info("victim").unwrap().status, common::JobStatus::Cancelled);
}

#[tokio::test]
async fn cancel_discards_result_of_running_task() {
    let exec = ScriptedExecutor {
        hold: vec![TaskType::VideoEncode, TaskType::AudioEncode, TaskType::Thumbnail],
        ..ScriptedExecutor::default()
    };
    let sched = scheduler(general(1), exec.clone());
    let handle = sched.submit(dag("cancel-me", 1080, &["720p", "1080p"])).unwrap();

    wait_until(|| exec.started().len() == 2).await;
    sched.cancel("cancel-me").unwrap();

    // the result does not wait for the running task
    let result = handle.wait().await.unwrap();
    assert!(result.cancelled);
    assert!(sched.worker_metrics().iter().any(|m| m.busy));

    exec.gate.add_permits(16);
    wait_until(|| sched.worker_metrics().iter().all(|m| !m.busy)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(exec.started().len(), 2);
    let info = sched.job_info("cancel-me").unwrap();
    assert_eq!(info.completed_tasks, 1);
    assert_eq!(info.skipped_tasks, info.total_tasks - 1);

    // a second cancel on a finished job is a no-op
    sched.cancel("cancel-me").unwrap();
}

#[tokio::test]
async fn slow_task_times_out_and_fails() {
    let exec = ScriptedExecutor {
        stall: vec![TaskType::Thumbnail],
        ..ScriptedExecutor::default()
    };
    let config = SchedulerConfig {
        task_timeout: Duration::from_millis(200),
        ..SchedulerConfig::default()
    };
    let sched = Scheduler::new(general(2), exec, config);
    let result = sched
        .submit(dag("slow", 720, &["720p"]))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.outcome, JobOutcome::PartialSuccess);
    assert_eq!(result.thumbnail_ref, None);
    assert_eq!(result.failures[0].task_id, THUMBNAIL_ID);
    assert!(result.failures[0].error_detail.contains("timed out"));
}
