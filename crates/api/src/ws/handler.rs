use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use flowline_core::error::CoreError;
use flowline_core::types::DbId;
use futures::{SinkExt, StreamExt};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::Principal;
use crate::state::AppState;
use crate::ws::manager::WsManager;

/// GET /api/v1/ws
///
/// Upgrades a project-scoped principal to a WebSocket that receives the
/// project's run progress frames. Principals without a project are rejected
/// before the upgrade.
pub async fn ws_handler(
    principal: Principal,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let project_id = principal.project_id.ok_or_else(|| {
        AppError::Core(CoreError::Forbidden(
            "A project-scoped principal is required".into(),
        ))
    })?;
    let principal_id = principal.id;
    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, state.ws_manager, principal_id, project_id)
    }))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), registers
/// the connection, forwards manager messages to the sink on a spawned task,
/// and drains inbound frames until the client goes away.
async fn handle_socket(
    socket: WebSocket,
    ws_manager: Arc<WsManager>,
    principal_id: String,
    project_id: DbId,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, project_id, "WebSocket connected");

    let mut rx = ws_manager
        .add(conn_id.clone(), Some(principal_id), Some(project_id))
        .await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            // Clients only listen.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
