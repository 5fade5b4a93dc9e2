use std::time::Duration;

use tracing::info;

use crate::executor::TaskExecutor;
use crate::scheduler::Scheduler;

/// Background reaper: forgets finished jobs once their retention window
/// has passed, so the job table does not grow forever.
pub async fn reap_finished_jobs<E: TaskExecutor>(
    scheduler: Scheduler<E>,
    interval: Duration,
    retention: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;

        let evicted = scheduler.evict_finished(retention);
        if !evicted.is_empty() {
            info!("evicted {} finished jobs: {:?}", evicted.len(), evicted);
        }
    }
}
