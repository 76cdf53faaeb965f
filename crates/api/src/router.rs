//! HTTP surface of the coordinator.
//!
//! [`build_app_router`] is shared by the binary and the integration tests so
//! both exercise the same layers. Three kinds of callers come through it:
//! public webhook senders (no token), worker processes polling
//! `/workers/poll` with a WORKER token, and flow executions reporting to
//! `/engine/*` with the ENGINE token minted at claim time. Principals are
//! checked per handler by extractors, not by a layer.

use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;

/// Headroom a long-held request gets on top of its own wait.
const LONG_WAIT_GRACE: Duration = Duration::from_secs(5);

/// Build the application [`Router`].
///
/// Layers, outermost first: CORS, request id, tracing, request id echo,
/// timeout, panic recovery. The request id is set before tracing so every
/// span of a webhook call or engine report carries it.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        // Liveness lives outside the versioned API.
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout(config),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// The router-wide deadline.
///
/// A synchronous webhook holds its caller for up to the webhook timeout and
/// a worker poll for up to the poll timeout. Both must end with their own
/// 504 or 204 rather than the router's 408, so a configured deadline that
/// does not outlast them is raised.
pub fn request_timeout(config: &ServerConfig) -> Duration {
    let configured = Duration::from_secs(config.request_timeout_secs);
    let longest_wait = config.webhook_timeout().max(config.poll_timeout());
    let floor = longest_wait + LONG_WAIT_GRACE;
    if configured < floor {
        tracing::warn!(
            configured_secs = configured.as_secs(),
            effective_secs = floor.as_secs(),
            "REQUEST_TIMEOUT_SECS is shorter than the webhook or poll wait, raising it",
        );
        return floor;
    }
    configured
}

/// CORS for dashboard origins. Workers and webhook senders are not browsers.
///
/// Panics at startup if any configured origin is invalid.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtConfig;
    use flowline_core::edition::{Edition, Environment};

    fn config(request: u64, webhook: u64, poll: u64) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: vec![],
            request_timeout_secs: request,
            shutdown_timeout_secs: 30,
            jwt: JwtConfig {
                secret: "secret".into(),
                engine_token_expiry_mins: 60,
            },
            edition: Edition::Community,
            environment: Environment::Production,
            database_url: None,
            webhook_timeout_secs: webhook,
            claim_timeout_secs: 600,
            sweep_interval_secs: 15,
            poll_timeout_secs: poll,
            max_consecutive_trigger_failures: None,
        }
    }

    #[test]
    fn configured_timeout_kept_when_it_outlasts_waits() {
        assert_eq!(request_timeout(&config(60, 30, 20)), Duration::from_secs(60));
    }

    #[test]
    fn short_timeout_raised_above_webhook_wait() {
        assert_eq!(request_timeout(&config(10, 30, 20)), Duration::from_secs(35));
    }
}
