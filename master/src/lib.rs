//! Transcode job scheduler: turns a source plus target renditions into a
//! task DAG and drives it across a fixed pool of specialized workers.

pub mod config;
pub mod executor;
pub mod handlers;
pub mod metadata;
pub mod monitor;
pub mod scheduler;
pub mod state;
pub mod tracker;

pub use config::MasterConfig;
pub use executor::{FailRule, SimulatedExecutor, TaskExecutor, TaskRun};
pub use scheduler::{JobHandle, Scheduler, SchedulerConfig};
pub use tracker::{CompletionEvent, CompletionTracker};
