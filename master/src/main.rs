use std::sync::Arc;

use anyhow::Context;
use common::{InMemoryBlobStore, InMemoryMetadataStore};
use master::handlers::{self, AppState};
use master::{metadata, monitor, MasterConfig, Scheduler, SimulatedExecutor};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("master=debug,common=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = MasterConfig::from_env().context("reading master configuration")?;
    info!(
        "worker pool: {}",
        config
            .pool
            .workers()
            .iter()
            .map(|w| w.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let blobs = Arc::new(InMemoryBlobStore::new());
    let metadata_store = Arc::new(InMemoryMetadataStore::new());

    let executor = SimulatedExecutor::new(blobs.clone())
        .with_time_scale(config.sim_time_scale)
        .with_failures(config.sim_fail.clone());
    let scheduler = Scheduler::new(config.pool.clone(), executor, config.scheduler.clone());

    // results go to the metadata store as jobs finish
    tokio::spawn(metadata::persist_results(
        scheduler.subscribe(),
        metadata_store.clone(),
    ));

    // finished-job reaper
    tokio::spawn(monitor::reap_finished_jobs(
        scheduler.clone(),
        config.reaper_interval,
        config.finished_job_retention,
    ));

    let app = handlers::build_router(AppState {
        scheduler,
        blobs,
        metadata: metadata_store,
    });

    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    info!("master listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
