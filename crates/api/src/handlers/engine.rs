//! Handlers for the worker-facing `/engine` routes.
//!
//! Every endpoint requires an ENGINE principal ([`RequireEngine`]); all
//! lookups are scoped to the principal's project and every queue mutation
//! presents the principal's claim token.

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use flowline_core::error::CoreError;
use flowline_core::flow::{FlowVersionQuery, FlowVersionRequest};
use flowline_core::queue::{JobStatus, JobUpdate, QueueName};
use flowline_core::run::{ProgressUpdateType, RunDetails};
use flowline_core::types::{DbId, RunId};
use serde::Deserialize;

use crate::engine::{JobClaim, ProgressReport};
use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireEngine;
use crate::response::DataResponse;
use crate::state::AppState;

/// Message recorded when a worker resolves a job without one.
const NO_MESSAGE: &str = "NO_MESSAGE_AVAILABLE";

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobRequest {
    pub queue_name: QueueName,
    pub status: JobStatus,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFailureCountRequest {
    pub flow_id: DbId,
    pub project_id: DbId,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRunRequest {
    pub run_id: RunId,
    pub worker_handler_id: Option<String>,
    pub http_request_id: Option<String>,
    #[serde(default)]
    pub progress_update_type: ProgressUpdateType,
    pub run_details: RunDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveStaleJobRequest {
    pub flow_id: Option<DbId>,
    pub flow_version_id: DbId,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// GET /api/v1/engine/runs/{run_id}
pub async fn get_run(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let run = state.coordinator.get_run(engine.project_id, run_id).await?;
    Ok(Json(DataResponse { data: run }))
}

/// POST /api/v1/engine/update-run
///
/// Progress report for a run. The job behind the principal's claim is
/// resolved once the report is terminal.
pub async fn update_run(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
    Json(input): Json<UpdateRunRequest>,
) -> AppResult<impl IntoResponse> {
    let status = input.run_details.status();
    let run = state
        .coordinator
        .report_progress(ProgressReport {
            run_id: input.run_id,
            project_id: engine.project_id,
            claim: Some(JobClaim {
                job_id: engine.job_id,
                token: engine.queue_token,
            }),
            details: input.run_details,
            worker_handler_id: input.worker_handler_id,
            http_request_id: input.http_request_id,
            progress_update_type: input.progress_update_type,
        })
        .await?;

    tracing::info!(
        run_id = %run.id,
        job_id = %engine.job_id,
        reported = %status,
        status = %run.status,
        "Run progress reported",
    );

    Ok(Json(DataResponse { data: run }))
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// POST /api/v1/engine/update-job
///
/// Queue-level resolution of the principal's job.
pub async fn update_job(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
    Json(input): Json<UpdateJobRequest>,
) -> AppResult<impl IntoResponse> {
    state
        .coordinator
        .update_job(JobUpdate {
            job_id: engine.job_id,
            queue_name: input.queue_name,
            status: input.status,
            token: engine.queue_token,
            message: input.message.unwrap_or_else(|| NO_MESSAGE.to_string()),
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/engine/remove-stale-job
pub async fn remove_stale_job(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
    Json(input): Json<RemoveStaleJobRequest>,
) -> AppResult<impl IntoResponse> {
    state
        .coordinator
        .remove_stale_job(engine.project_id, input.flow_id, input.flow_version_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

/// POST /api/v1/engine/update-failure-count
pub async fn update_failure_count(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
    Json(input): Json<UpdateFailureCountRequest>,
) -> AppResult<impl IntoResponse> {
    if input.project_id != engine.project_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot update flows of another project".into(),
        )));
    }
    state
        .coordinator
        .record_trigger_outcome(engine.project_id, input.flow_id, input.success)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/engine/populated-flows
///
/// Every flow of the project with its latest version; unpaged.
pub async fn populated_flows(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let flows = state.coordinator.list_flows(engine.project_id).await?;
    Ok(Json(DataResponse { data: flows }))
}

/// GET /api/v1/engine/flows?type=LATEST|EXACT|LOCKED&flowId=..&versionId=..
///
/// One flow version with every piece version pinned.
pub async fn get_flow(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
    Query(query): Query<FlowVersionQuery>,
) -> AppResult<impl IntoResponse> {
    let request = FlowVersionRequest::try_from(query)?;
    let flow = state
        .coordinator
        .get_flow_for_worker(engine.project_id, request)
        .await?;
    Ok(Json(DataResponse { data: flow }))
}

// ---------------------------------------------------------------------------
// Quota and files
// ---------------------------------------------------------------------------

/// GET /api/v1/engine/check-task-limit
///
/// 204 while the project may keep executing, 402 once it hit its ceiling.
pub async fn check_task_limit(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    state.coordinator.check_task_limit(engine.project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/engine/files/{file_id}
///
/// Raw package archive referenced by a job, scoped to the caller's project.
pub async fn get_file(
    RequireEngine(engine): RequireEngine,
    State(state): State<AppState>,
    Path(file_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let data = state
        .coordinator
        .get_package_archive(engine.project_id, file_id)
        .await?;
    Ok((StatusCode::OK, [(CONTENT_TYPE, "application/zip")], data))
}
