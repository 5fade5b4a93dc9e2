use std::env;
use std::str::FromStr;
use std::time::Duration;

use common::{Error, Result, WorkerPool};

use crate::executor::FailRule;
use crate::scheduler::SchedulerConfig;

pub const DEFAULT_WORKER_POOL: &str =
    "split=1,video_encode=2,audio_encode=1,thumbnail=1,merge=1,general=2";

/// Master configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub addr: String,
    pub pool: WorkerPool,
    pub scheduler: SchedulerConfig,
    pub finished_job_retention: Duration,
    pub reaper_interval: Duration,
    pub sim_time_scale: f64,
    pub sim_fail: Vec<FailRule>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            pool: WorkerPool::parse(DEFAULT_WORKER_POOL).unwrap_or_default(),
            scheduler: SchedulerConfig::default(),
            finished_job_retention: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(5),
            sim_time_scale: 1.0,
            sim_fail: Vec::new(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let pool_spec = env::var("WORKER_POOL").unwrap_or_else(|_| DEFAULT_WORKER_POOL.to_string());
        let pool = WorkerPool::parse(&pool_spec)?;
        if pool.is_empty() {
            return Err(Error::config("WORKER_POOL describes an empty pool"));
        }

        Ok(Self {
            addr: env::var("MASTER_ADDR").unwrap_or(defaults.addr),
            pool,
            scheduler: SchedulerConfig {
                task_timeout: Duration::from_secs(env_or(
                    "TASK_TIMEOUT_SECS",
                    defaults.scheduler.task_timeout.as_secs(),
                )),
                event_capacity: env_or("EVENT_CHANNEL_CAPACITY", defaults.scheduler.event_capacity),
            },
            finished_job_retention: Duration::from_secs(env_or(
                "FINISHED_JOB_RETENTION_SECS",
                defaults.finished_job_retention.as_secs(),
            )),
            reaper_interval: Duration::from_secs(env_or(
                "REAPER_INTERVAL_SECS",
                defaults.reaper_interval.as_secs(),
            ))
            .max(Duration::from_secs(1)),
            sim_time_scale: env_or("SIM_TIME_SCALE", defaults.sim_time_scale),
            sim_fail: FailRule::parse_list(&env::var("SIM_FAIL").unwrap_or_default())?,
        })
    }
}
