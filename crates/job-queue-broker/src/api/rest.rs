use crate::{metrics::QueueMetrics, queue::JobQueue};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use job_queue_core::{Job, JobError, JobId, JobStatus, QueueStats};
use job_queue_worker::WorkerPool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub pool: Arc<WorkerPool>,
    pub metrics: Arc<QueueMetrics>,
    pub default_max_retries: u32,
}

/// REST API routes
pub fn create_rest_api(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/jobs/:job_id", get(get_job))
        .route("/api/v1/jobs/:job_id/retry", post(retry_job))
        .route("/api/v1/stats", get(get_stats))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    job_type: String,
    #[serde(default)]
    payload: Value,
    max_retries: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SubmitJobResponse {
    job_id: JobId,
    status: JobStatus,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    id: JobId,
    job_type: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: u32,
    max_retries: u32,
    result: Option<Value>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        JobResponse {
            id: job.id,
            job_type: job.job_type.to_string(),
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            result: job.result,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    workers: usize,
    busy_workers: usize,
    queued: u64,
}

/// Submit a new job
async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let max_retries = req.max_retries.unwrap_or(state.default_max_retries);
    let job_id = state.queue.add_job(&req.job_type, req.payload, max_retries)?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// Get job by ID
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .queue
        .get_job_status(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    Ok(Json(job.into()))
}

/// Re-submit a failed job as a new job
async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let new_id = state.queue.retry_failed_job(&job_id)?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: new_id,
            status: JobStatus::Queued,
        }),
    ))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.get_queue_stats()?))
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.queue.get_queue_stats()?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        workers: state.pool.concurrency(),
        busy_workers: state.pool.busy_workers(),
        queued: stats.queued,
    }))
}

/// Prometheus text exposition
async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.queue.refresh_metrics()?;
    state.metrics.workers_busy.set(state.pool.busy_workers() as i64);

    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

/// API error types
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::UnknownJobType(_) => ApiError::BadRequest(err.to_string()),
            JobError::InvalidState { .. } | JobError::InvalidTransition { .. } => {
                ApiError::Conflict(err.to_string())
            }
            JobError::Configuration(_) | JobError::HandlerFailure(_) | JobError::Persistence(_) => {
                error!("Request failed: {}", err);
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
