pub mod engine;
pub mod health;
pub mod webhooks;
pub mod workers;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                                   WebSocket (run progress per project)
///
/// /engine/runs/{run_id}                 get run (ENGINE)
/// /engine/update-run                    progress report (ENGINE)
/// /engine/update-job                    resolve job (ENGINE)
/// /engine/remove-stale-job              drop schedule of a deleted flow (ENGINE)
/// /engine/update-failure-count          trigger outcome (ENGINE)
/// /engine/populated-flows               list project flows (ENGINE)
/// /engine/flows                         get flow version, pinned (ENGINE)
/// /engine/check-task-limit              quota probe (ENGINE)
/// /engine/files/{file_id}               package archive (ENGINE)
///
/// /workers/poll                         claim a job (WORKER)
///
/// /webhooks/{flow_id}                   start run (public)
/// /webhooks/{flow_id}/sync              start run and wait for reply (public)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // WebSocket endpoint.
        .route("/ws", get(ws::ws_handler))
        // Worker-facing engine calls.
        .nest("/engine", engine::router())
        // Job dispatch.
        .nest("/workers", workers::router())
        // Public webhook ingress.
        .nest("/webhooks", webhooks::router())
}
