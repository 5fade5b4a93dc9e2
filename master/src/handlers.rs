use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    build_dag, new_job_id, BlobStore, Error, JobInfo, JobRequest, JobResult, MetadataStore,
    WorkerMetrics,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::executor::TaskExecutor;
use crate::scheduler::Scheduler;

/// Size of the raw payload stored for sources that were never uploaded.
const PLACEHOLDER_SOURCE_BYTES: usize = 4 * 1024;

pub struct AppState<E> {
    pub scheduler: Scheduler<E>,
    pub blobs: Arc<dyn BlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            blobs: Arc::clone(&self.blobs),
            metadata: Arc::clone(&self.metadata),
        }
    }
}

pub fn build_router<E: TaskExecutor>(state: AppState<E>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_job::<E>))
        .route("/api/v1/jobs/:id", get(get_job::<E>))
        .route("/api/v1/jobs/:id/results", get(get_job_results::<E>))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job::<E>))
        .route("/api/v1/workers", get(list_workers::<E>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps scheduler errors onto HTTP status codes.
pub enum ApiError {
    Scheduler(Error),
    NotReady(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Scheduler(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotReady(id) => (
                StatusCode::CONFLICT,
                format!("job {id} has not finished yet"),
            ),
            ApiError::Scheduler(e) => {
                let status = match &e {
                    Error::InvalidPlan(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
                    Error::UnknownJob(_) => StatusCode::NOT_FOUND,
                    Error::DuplicateJob(_) => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/* ---------------- HTTP handlers ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Builds the DAG for the request and hands it to the scheduler.
async fn create_job<E: TaskExecutor>(
    State(state): State<AppState<E>>,
    Json(mut req): Json<JobRequest>,
) -> Result<Json<JobInfo>, ApiError> {
    // Sources that were never uploaded get a synthetic raw payload so the
    // simulated SPLIT has something to read.
    if state.blobs.fetch(&req.source.source_ref).is_err() {
        let stored = state.blobs.store(vec![0u8; PLACEHOLDER_SOURCE_BYTES])?;
        info!(
            "source {} not in blob store, ingested placeholder as {}",
            req.source.source_ref, stored
        );
        req.source.source_ref = stored;
    }

    let job_id = new_job_id();
    let dag = build_dag(job_id.clone(), &req.source, &req.variants)?;
    state.scheduler.submit(dag)?;

    state
        .scheduler
        .job_info(&job_id)
        .map(Json)
        .ok_or(ApiError::Scheduler(Error::UnknownJob(job_id)))
}

async fn get_job<E: TaskExecutor>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    state
        .scheduler
        .job_info(&id)
        .map(Json)
        .ok_or(ApiError::Scheduler(Error::UnknownJob(id)))
}

// Results outlive the job record: the metadata store is consulted first.
async fn get_job_results<E: TaskExecutor>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<JobResult>, ApiError> {
    if let Some(result) = state.metadata.get(&id) {
        return Ok(Json(result));
    }
    if let Some(result) = state.scheduler.job_result(&id) {
        return Ok(Json(result));
    }
    if state.scheduler.job_info(&id).is_some() {
        return Err(ApiError::NotReady(id));
    }
    Err(ApiError::Scheduler(Error::UnknownJob(id)))
}

async fn cancel_job<E: TaskExecutor>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    if let Err(e) = state.scheduler.cancel(&id) {
        warn!("cancel of job {} rejected: {}", id, e);
        return Err(e.into());
    }
    state
        .scheduler
        .job_info(&id)
        .map(Json)
        .ok_or(ApiError::Scheduler(Error::UnknownJob(id)))
}

async fn list_workers<E: TaskExecutor>(
    State(state): State<AppState<E>>,
) -> Json<Vec<WorkerMetrics>> {
    Json(state.scheduler.worker_metrics())
}
