//! Public webhook ingress.
//!
//! `POST /webhooks/{flow_id}` starts a run and answers immediately.
//! `POST /webhooks/{flow_id}/sync` holds the connection until the run
//! replies (a webhook pause, a stop response or a terminal status) or the
//! configured webhook timeout elapses.

use std::collections::{BTreeMap, HashMap};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowline_core::types::DbId;
use flowline_core::webhook_response::{EngineHttpResponse, STATUS_NO_CONTENT};
use serde_json::{json, Value};

use crate::engine::{ReplyTarget, StartRun};
use crate::error::AppResult;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/webhooks/{flow_id}
pub async fn trigger_async(
    State(state): State<AppState>,
    Path(flow_id): Path<DbId>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let flow = state.coordinator.webhook_flow(flow_id).await?;
    let run = state
        .coordinator
        .start_run(StartRun {
            flow,
            trigger_payload: trigger_payload(&headers, query, &body),
            reply_to: None,
        })
        .await?;

    tracing::info!(flow_id, run_id = %run.id, "Webhook accepted");
    Ok(Json(json!({})))
}

/// POST /api/v1/webhooks/{flow_id}/sync
///
/// Replies with whatever HTTP response the run produces; 504 on timeout.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(flow_id): Path<DbId>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let flow = state.coordinator.webhook_flow(flow_id).await?;

    let watcher = &state.webhook_watcher;
    let request_id = uuid::Uuid::new_v4().to_string();
    let pending = watcher.register(&request_id).await;

    let started = state
        .coordinator
        .start_run(StartRun {
            flow,
            trigger_payload: trigger_payload(&headers, query, &body),
            reply_to: Some(ReplyTarget {
                handler_id: watcher.handler_id().to_string(),
                request_id: request_id.clone(),
            }),
        })
        .await;
    let run = match started {
        Ok(run) => run,
        Err(e) => {
            watcher.release(pending).await;
            return Err(e.into());
        }
    };

    tracing::info!(flow_id, run_id = %run.id, request_id = %request_id, "Waiting for webhook reply");
    let reply = watcher.wait(pending).await;
    Ok(into_http_response(reply))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The trigger payload handed to the run: `{ body, headers, queryParams }`.
///
/// JSON bodies are passed through; anything else becomes a string.
fn trigger_payload(headers: &HeaderMap, query: HashMap<String, String>, body: &Bytes) -> Value {
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
    };

    let headers: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let query: BTreeMap<String, String> = query.into_iter().collect();

    json!({
        "body": body,
        "headers": headers,
        "queryParams": query,
    })
}

/// Render a run-produced reply. Invalid status codes become 500 and invalid
/// headers are dropped.
fn into_http_response(reply: EngineHttpResponse) -> Response {
    let status =
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = if reply.status == STATUS_NO_CONTENT {
        status.into_response()
    } else {
        (status, Json(reply.body)).into_response()
    };

    for (name, value) in &reply.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid reply header"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_body_becomes_string() {
        let payload = trigger_payload(&HeaderMap::new(), HashMap::new(), &Bytes::from("a=1"));
        assert_eq!(payload["body"], json!("a=1"));
    }

    #[test]
    fn json_body_and_query_pass_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-source", HeaderValue::from_static("crm"));
        let query = HashMap::from([("page".to_string(), "2".to_string())]);

        let payload = trigger_payload(&headers, query, &Bytes::from(r#"{"id":5}"#));
        assert_eq!(payload["body"], json!({ "id": 5 }));
        assert_eq!(payload["headers"]["x-source"], json!("crm"));
        assert_eq!(payload["queryParams"]["page"], json!("2"));
    }

    #[test]
    fn invalid_status_falls_back_to_500() {
        let response = into_http_response(EngineHttpResponse {
            status: 42,
            body: json!({}),
            headers: BTreeMap::new(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn reply_headers_are_copied() {
        let headers = BTreeMap::from([
            ("x-flow".to_string(), "1".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        let response = into_http_response(EngineHttpResponse {
            status: 202,
            body: json!({ "ok": true }),
            headers,
        });
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-flow"], "1");
        assert_eq!(response.headers().len(), 2);
    }
}
