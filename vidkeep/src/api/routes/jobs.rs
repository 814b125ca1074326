//! Job admission and lifecycle routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{JobResponse, JobStateResponse, SubmitJobRequest, SubmitJobResponse};
use crate::api::server::AppState;
use crate::domain::JobId;
use crate::scheduler::{JobScheduler, QueueStatus};

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/{id}", get(get_job).delete(delete_job))
        .route("/{id}/cancel", post(cancel_job))
        .route("/{id}/retry", post(retry_job))
}

/// Create the queue router.
pub fn queue_router() -> Router<AppState> {
    Router::new().route("/status", get(queue_status))
}

fn scheduler(state: &AppState) -> ApiResult<&Arc<JobScheduler>> {
    state
        .scheduler
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Scheduler not available"))
}

/// Submit a media reference for ingestion.
async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let job = scheduler(&state)?.submit(&request.reference).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.id.to_string(),
            state: job.state,
            message: "Job queued".to_string(),
        }),
    ))
}

/// List all jobs, newest first.
async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobResponse>>> {
    let jobs = scheduler(&state)?
        .list()
        .into_iter()
        .map(JobResponse::from)
        .collect();
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let id = JobId::parse(&id)?;
    let job = scheduler(&state)?.get(&id)?;
    Ok(Json(job.into()))
}

/// Delete a terminal job and its files.
async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let id = JobId::parse(&id)?;
    scheduler(&state)?.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Cancel a pending or running job.
///
/// A running job reports `running`; it lands in `cancelled` once its worker
/// has stopped and cleaned up.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStateResponse>> {
    let id = JobId::parse(&id)?;
    let state = scheduler(&state)?.cancel(&id).await?;
    Ok(Json(JobStateResponse {
        job_id: id.to_string(),
        state,
    }))
}

async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStateResponse>> {
    let id = JobId::parse(&id)?;
    let job = scheduler(&state)?.retry(&id).await?;
    Ok(Json(JobStateResponse {
        job_id: job.id.to_string(),
        state: job.state,
    }))
}

async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatus>> {
    Ok(Json(scheduler(&state)?.queue_status()))
}
