//! Event bus to WebSocket relay.
//!
//! [`ProgressRelay`] subscribes to the platform event bus and forwards every
//! run progress event, as a `{"type": "flow_run_progress", "run": ...}`
//! frame, to the connections of the run's project only.

use std::sync::Arc;

use axum::extract::ws::Message;
use flowline_core::run_events::{EVENT_FLOW_RUN_PROGRESS, MSG_TYPE_FLOW_RUN_PROGRESS};
use flowline_events::PlatformEvent;
use tokio::sync::broadcast;

use crate::ws::WsManager;

pub struct ProgressRelay {
    ws_manager: Arc<WsManager>,
}

impl ProgressRelay {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run the relay loop.
    ///
    /// The loop exits when the channel is closed (i.e. the
    /// [`EventBus`](flowline_events::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.forward(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Progress relay lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, progress relay shutting down");
                    break;
                }
            }
        }
    }

    async fn forward(&self, event: &PlatformEvent) {
        if event.event_type != EVENT_FLOW_RUN_PROGRESS {
            return;
        }
        // Unscoped events have no audience.
        let Some(project_id) = event.project_id else {
            return;
        };
        let frame = serde_json::json!({
            "type": MSG_TYPE_FLOW_RUN_PROGRESS,
            "run": event.payload,
        });
        let delivered = self
            .ws_manager
            .send_to_project(project_id, Message::Text(frame.to_string().into()))
            .await;
        tracing::trace!(project_id, delivered, "Run progress relayed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_only_to_the_runs_project() {
        let ws_manager = Arc::new(WsManager::new());
        let mut same = ws_manager.add("a".into(), None, Some(1)).await;
        let mut other = ws_manager.add("b".into(), None, Some(2)).await;

        let relay = ProgressRelay::new(Arc::clone(&ws_manager));
        let event = PlatformEvent::new(EVENT_FLOW_RUN_PROGRESS)
            .for_project(1)
            .with_payload(serde_json::json!({ "id": "run-1", "status": "SUCCEEDED" }));
        relay.forward(&event).await;

        let Message::Text(text) = same.recv().await.unwrap() else {
            panic!("expected a text frame");
        };
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame["type"], "flow_run_progress");
        assert_eq!(frame["run"]["status"], "SUCCEEDED");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn ignores_other_event_types() {
        let ws_manager = Arc::new(WsManager::new());
        let mut rx = ws_manager.add("a".into(), None, Some(1)).await;

        let relay = ProgressRelay::new(Arc::clone(&ws_manager));
        relay
            .forward(&PlatformEvent::new("flow.disabled").for_project(1))
            .await;

        assert!(rx.try_recv().is_err());
    }
}
