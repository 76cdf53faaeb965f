//! Route definitions for public webhook ingress.
//!
//! No authentication; the flow id in the path selects the flow.

use axum::routing::post;
use axum::Router;

use crate::handlers::webhooks;
use crate::state::AppState;

/// Routes mounted at `/webhooks`.
///
/// ```text
/// POST   /{flow_id}               -> trigger_async
/// POST   /{flow_id}/sync          -> trigger_sync
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{flow_id}", post(webhooks::trigger_async))
        .route("/{flow_id}/sync", post(webhooks::trigger_sync))
}
