use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, warn};
use validator::Validate;

use super::error::ApiError;
use crate::models::{
    AppState, AskRequest, JobCreateResponse, JobId, JobResultResponse, JobStatus, JobUpdate,
};
use crate::queue::DispatchMessage;

pub const ACCEPTED_MESSAGE: &str = "Job accepted and queued for processing.";
const UNQUEUED_ERROR: &str = "job could not be queued for processing";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/ask", post(submit_question))
        .route("/api/v1/ask/{job_id}", get(get_job))
        .with_state(state)
}

pub async fn submit_question(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobCreateResponse>), ApiError> {
    let Json(request) = payload?;
    request.validate()?;

    let job = state.store.create(&request.question).await?;

    if let Err(e) = state.dispatcher.enqueue(DispatchMessage::new(&job)).await {
        error!(job_id = %job.id, error = %e, "Failed to enqueue job");
        fail_unqueued(&state, job.id).await;
        return Err(e.into());
    }

    info!(job_id = %job.id, "Job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreateResponse {
            job_id: job.id.to_string(),
            status: JobStatus::Pending,
            message: ACCEPTED_MESSAGE.to_string(),
        }),
    ))
}

/// Best effort: a job whose message never reached the queue would otherwise
/// stay PENDING forever.
async fn fail_unqueued(state: &AppState, job_id: JobId) {
    let result = match state
        .store
        .transition(job_id, JobStatus::Pending, JobUpdate::Processing)
        .await
    {
        Ok(_) => {
            state
                .store
                .transition(job_id, JobStatus::Processing, JobUpdate::failed(UNQUEUED_ERROR, None))
                .await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!(job_id = %job_id, error = %e, "Could not mark unqueued job as failed");
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResultResponse>, ApiError> {
    let job_id: JobId = job_id.parse()?;
    let job = state.store.get(job_id).await?;
    Ok(Json(JobResultResponse::from(job)))
}
