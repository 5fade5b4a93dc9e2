use std::env;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{JobInfo, JobRequest, JobResult, JobStatus, SourceDescriptor, WorkerMetrics};
use reqwest::{Client, Response};

/// - In Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Submit and inspect transcode jobs on the master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a source for transcoding into the given renditions
    Submit {
        #[arg(value_name = "SOURCE_REF")]
        source_ref: String,

        /// Source height in pixels
        #[arg(long)]
        height: u32,

        /// Source width in pixels (defaults to 16:9)
        #[arg(long)]
        width: Option<u32>,

        /// Source duration in seconds
        #[arg(long, default_value_t = 0.0)]
        duration: f64,

        /// Poll until the job finishes and print its result
        #[arg(long)]
        wait: bool,

        /// Target renditions, e.g. 720p 360p
        #[arg(value_name = "VARIANT", required = true)]
        variants: Vec<String>,
    },
    /// Show a job and the state of its tasks
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Show the result of a finished job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Cancel a job; tasks already running finish but are discarded
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// List the worker pool with per-worker metrics
    Workers,
}

async fn error_text(resp: Response) -> String {
    let status = resp.status();
    match resp.json::<serde_json::Value>().await {
        Ok(body) => match body.get("error").and_then(|e| e.as_str()) {
            Some(msg) => format!("{msg} (status {status})"),
            None => format!("status {status}"),
        },
        Err(_) => format!("status {status}"),
    }
}

fn is_finished(status: JobStatus) -> bool {
    !matches!(status, JobStatus::Accepted | JobStatus::Running)
}

fn print_job(job: &JobInfo) {
    println!("Job {}", job.id);
    println!("  status     : {:?}", job.status);
    println!("  variants   : {}", job.variants.join(", "));
    println!(
        "  tasks      : total={}, completed={}, failed={}, skipped={}",
        job.total_tasks, job.completed_tasks, job.failed_tasks, job.skipped_tasks
    );
    let done = job.completed_tasks + job.failed_tasks + job.skipped_tasks;
    if job.total_tasks > 0 {
        let pct = (done as f64 / job.total_tasks as f64) * 100.0;
        println!("  progress   : {:.1}%", pct);
    }
    println!("  submitted  : {}", job.submitted_at);
    if let Some(ref started) = job.started_at {
        println!("  started    : {}", started);
    }
    if let Some(ref finished) = job.finished_at {
        println!("  finished   : {}", finished);
    }
    for t in &job.tasks {
        let worker = t.worker_id.as_deref().unwrap_or("-");
        match &t.error_detail {
            Some(err) => println!("    {:<20} {:?} on {} ({})", t.id, t.status, worker, err),
            None => println!("    {:<20} {:?} on {}", t.id, t.status, worker),
        }
    }
}

fn print_result(result: &JobResult) {
    println!("Result for job {}", result.job_id);
    println!("  outcome    : {:?}", result.outcome);
    if result.cancelled {
        println!("  (cancelled)");
    }
    println!("  produced   : {}", result.produced_variants.join(", "));
    if !result.missing_variants.is_empty() {
        println!("  missing    : {}", result.missing_variants.join(", "));
    }
    for r in &result.rendition_refs {
        println!("    rendition {}", r);
    }
    match &result.thumbnail_ref {
        Some(t) => println!("  thumbnail  : {}", t),
        None => println!("  thumbnail  : (none)"),
    }
    for f in &result.failures {
        println!("  failed {}: {}", f.task_id, f.error_detail);
    }
}

async fn fetch_result(client: &Client, base_url: &str, id: &str) -> Result<Option<JobResult>> {
    let url = format!("{}/api/v1/jobs/{id}/results", base_url);
    let resp = client.get(&url).send().await?;
    if resp.status() == reqwest::StatusCode::CONFLICT {
        return Ok(None);
    }
    if !resp.status().is_success() {
        bail!("no results for job {id}: {}", error_text(resp).await);
    }
    Ok(Some(resp.json().await?))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit {
            source_ref,
            height,
            width,
            duration,
            wait,
            variants,
        } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let req = JobRequest {
                source: SourceDescriptor {
                    source_ref,
                    width: width.unwrap_or(height * 16 / 9),
                    height,
                    duration_secs: duration,
                },
                variants,
            };

            let resp = client.post(&url).json(&req).send().await?;
            if !resp.status().is_success() {
                bail!("job rejected: {}", error_text(resp).await);
            }
            let job: JobInfo = resp.json().await?;
            println!("Job created: {} ({} tasks)", job.id, job.total_tasks);

            if wait {
                loop {
                    if let Some(result) = fetch_result(&client, &base_url, &job.id).await? {
                        print_result(&result);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                bail!("job {id}: {}", error_text(resp).await);
            }
            let job: JobInfo = resp.json().await?;
            print_job(&job);
            if is_finished(job.status) {
                println!("  (finished, see `client results {}`)", job.id);
            }
        }

        Commands::Results { id } => match fetch_result(&client, &base_url, &id).await? {
            Some(result) => print_result(&result),
            None => println!("Job {id} has not finished yet"),
        },

        Commands::Cancel { id } => {
            let url = format!("{}/api/v1/jobs/{id}/cancel", base_url);
            let resp = client.post(&url).send().await?;
            if !resp.status().is_success() {
                bail!("cancel of job {id} failed: {}", error_text(resp).await);
            }
            let job: JobInfo = resp.json().await?;
            println!("Job {} is now {:?}", job.id, job.status);
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                bail!("querying /api/v1/workers: {}", error_text(resp).await);
            }
            let workers: Vec<WorkerMetrics> = resp.json().await?;
            for w in workers {
                println!("Worker {}", w.worker_id);
                println!("  specialization : {}", w.specialization);
                println!("  busy           : {}", w.busy);
                println!(
                    "  tasks          : started={}, ok={}, failed={}",
                    w.tasks_started, w.tasks_succeeded, w.tasks_failed
                );
                match w.avg_task_ms {
                    Some(avg) => println!("  avg_task_ms    : {:.1}", avg),
                    None => println!("  avg_task_ms    : (no data)"),
                }
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn submit_parses_variants_and_source() {
        let cli = Cli::try_parse_from([
            "client", "submit", "raw/cat.mov", "--height", "1080", "720p", "360p",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                source_ref,
                height,
                width,
                variants,
                wait,
                ..
            } => {
                assert_eq!(source_ref, "raw/cat.mov");
                assert_eq!(height, 1080);
                assert_eq!(width, None);
                assert!(!wait);
                assert_eq!(variants, vec!["720p", "360p"]);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn submit_requires_a_variant() {
        assert!(Cli::try_parse_from(["client", "submit", "raw", "--height", "720"]).is_err());
    }

    #[test]
    fn only_accepted_and_running_are_unfinished() {
        assert!(!is_finished(JobStatus::Accepted));
        assert!(!is_finished(JobStatus::Running));
        assert!(is_finished(JobStatus::Cancelled));
        assert!(is_finished(JobStatus::PartiallySucceeded));
    }
}
