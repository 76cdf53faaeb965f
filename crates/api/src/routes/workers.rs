use axum::routing::post;
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`.
///
/// ```text
/// POST   /poll?queue=ONE_TIME     -> poll
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/poll", post(workers::poll))
}
