//! Job trigger and status endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use crate::MonitorError;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::TriggerRequest,
};
use crate::jobs::{JobHandle, JobId, JobStatusLookup, TriggerOutcome};

/// POST /api/v1/jobs/monitor/trigger
///
/// The body is optional; `userId` is recorded as the trigger user.
pub async fn trigger_monitor(
    State(state): State<ApiState>,
    body: Option<Json<TriggerRequest>>,
) -> ApiResult<Json<TriggerOutcome>> {
    let user = body.and_then(|Json(request)| request.user_id);
    info!("manual monitoring requested by {}", user.as_deref().unwrap_or("anonymous"));

    // submission is synchronous and may block on the queue
    let trigger = state.trigger.clone();
    let outcome = tokio::task::spawn_blocking(move || trigger.run_manual(user))
        .await
        .map_err(|e| MonitorError::Internal(format!("trigger task failed: {e}")))??;

    Ok(Json(outcome))
}

/// GET /api/v1/jobs/:id
pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobHandle>> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| ApiError::InvalidRequest(format!("'{id}' is not a job id")))?;

    state
        .jobs
        .status(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))
}
