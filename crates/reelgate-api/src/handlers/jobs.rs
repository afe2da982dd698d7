//! Job handlers.
//!
//! `POST /api/jobs` starts a job for an admitted caller;
//! `GET /api/jobs/:task_id/status` relays the backend's task snapshot.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use reelgate_models::{AdmissionDecision, TaskId, TaskRecord};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::identity::AuthUser;
use crate::security::validate_source_reference;
use crate::state::AppState;

/// Request body for starting a job.
#[derive(Debug, Deserialize, Validate)]
pub struct StartJobRequest {
    #[validate(length(min = 1, max = 2048))]
    pub source_reference: String,
}

/// Response for a started job.
#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<AdmissionDecision>,
}

/// POST /api/jobs
///
/// Returns:
/// - 200: `{task_id}`
/// - 400: Source reference is not an accepted URL
/// - 401: Not authenticated (set by the gate)
/// - 429: Quota exceeded (set by the gate)
/// - 500: Backend rejected the job or is unreachable
pub async fn start_job(
    State(state): State<AppState>,
    user: AuthUser,
    admission: Option<axum::Extension<AdmissionDecision>>,
    body: Result<Json<StartJobRequest>, JsonRejection>,
) -> ApiResult<Json<StartJobResponse>> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    request.validate()?;

    let source = validate_source_reference(&request.source_reference)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let submission = state.submitter.submit(&source).await?;

    info!(
        identity = %user.key,
        task_id = %submission.task_id,
        "Job started"
    );

    Ok(Json(StartJobResponse {
        task_id: submission.task_id,
        quota: admission.map(|axum::Extension(d)| d),
    }))
}

/// GET /api/jobs/:task_id/status
///
/// Returns:
/// - 200: Task record
/// - 400: Malformed task ID
/// - 404: Unknown task
/// - 500: Backend unreachable
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    let task_id = TaskId::from(task_id);
    if !task_id.is_well_formed() {
        return Err(ApiError::bad_request("Invalid task ID format"));
    }

    let record = state.backend.get_status(&task_id).await?;
    Ok(Json(record))
}
