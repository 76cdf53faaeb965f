//! Route definitions for the worker-facing `/engine` resource.
//!
//! All endpoints require an ENGINE token.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::engine;
use crate::state::AppState;

/// Routes mounted at `/engine`.
///
/// ```text
/// GET    /runs/{run_id}           -> get_run
/// POST   /update-run              -> update_run
/// POST   /update-job              -> update_job
/// POST   /remove-stale-job        -> remove_stale_job
/// POST   /update-failure-count    -> update_failure_count
/// GET    /populated-flows         -> populated_flows
/// GET    /flows                   -> get_flow
/// GET    /check-task-limit        -> check_task_limit
/// GET    /files/{file_id}         -> get_file
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs/{run_id}", get(engine::get_run))
        .route("/update-run", post(engine::update_run))
        .route("/update-job", post(engine::update_job))
        .route("/remove-stale-job", post(engine::remove_stale_job))
        .route("/update-failure-count", post(engine::update_failure_count))
        .route("/populated-flows", get(engine::populated_flows))
        .route("/flows", get(engine::get_flow))
        .route("/check-task-limit", get(engine::check_task_limit))
        .route("/files/{file_id}", get(engine::get_file))
}
