//! Worker dispatch channel.
//!
//! Workers long-poll for a job; a claim is handed back together with a
//! freshly minted ENGINE token bound to the job, its project and the claim
//! token, which the engine then uses for every `/engine` call.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowline_core::job_data::JobData;
use flowline_core::queue::{ClaimedJob, JobStatus, JobUpdate, QueueName};
use flowline_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::auth::jwt::generate_engine_token;
use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireWorker;
use crate::response::DataResponse;
use crate::state::AppState;

/// Pause between empty claim attempts while long-polling.
const POLL_RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    #[serde(default = "default_queue")]
    pub queue: QueueName,
}

fn default_queue() -> QueueName {
    QueueName::OneTime
}

/// A claimed job as handed to a worker.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolledJob {
    pub job_id: JobId,
    pub queue_name: QueueName,
    pub payload: serde_json::Value,
    pub attempts: i32,
    /// Bearer token for the `/engine` routes while executing this job.
    pub engine_token: String,
}

/// POST /api/v1/workers/poll?queue=ONE_TIME
///
/// Claims the oldest due job of the queue, waiting up to the configured
/// poll timeout. 200 with the job, or 204 when nothing became claimable.
pub async fn poll(
    RequireWorker(worker): RequireWorker,
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> AppResult<Response> {
    let deadline = tokio::time::Instant::now() + state.config.poll_timeout();

    loop {
        if let Some(claimed) = state.queue.claim(query.queue, &worker.id).await? {
            if let Some(polled) = hand_out(&state, claimed).await? {
                tracing::info!(
                    job_id = %polled.job_id,
                    worker_id = %worker.id,
                    queue = %polled.queue_name,
                    "Job claimed by worker",
                );
                return Ok(Json(DataResponse { data: polled }).into_response());
            }
            continue;
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        tokio::time::sleep(POLL_RETRY_INTERVAL.min(deadline - now)).await;
    }
}

/// Mint the engine token for a claim.
///
/// A job whose payload cannot be decoded can never run; it is failed on the
/// spot and `None` is returned so the caller keeps polling.
async fn hand_out(state: &AppState, claimed: ClaimedJob) -> AppResult<Option<PolledJob>> {
    let ClaimedJob { job, token } = claimed;
    let data = match JobData::from_payload(&job.payload) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Failing job with malformed payload");
            state
                .queue
                .update(JobUpdate {
                    job_id: job.id,
                    queue_name: job.queue_name,
                    status: JobStatus::Failed,
                    token,
                    message: e.to_string(),
                })
                .await?;
            return Ok(None);
        }
    };

    let engine_token = generate_engine_token(job.id, data.project_id(), &token, &state.config.jwt)
        .map_err(|e| AppError::InternalError(format!("Failed to mint engine token: {e}")))?;

    Ok(Some(PolledJob {
        job_id: job.id,
        queue_name: job.queue_name,
        payload: job.payload,
        attempts: job.attempts,
        engine_token,
    }))
}
