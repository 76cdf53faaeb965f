//! Synchronous webhook reply correlation.
//!
//! A process that accepts a synchronous webhook registers a pending slot
//! keyed by the request id and waits on it. Whichever process later computes
//! the reply publishes it through a [`ResponseBroker`], addressed to the
//! waiting process's handler id. Every watcher receives every message and
//! keeps only those addressed to itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowline_core::error::CoreResult;
use flowline_core::webhook_response::EngineHttpResponse;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Mutex};

/// Capacity of the in-memory broker channel.
const BROKER_CAPACITY: usize = 256;

/// A reply addressed to one handler instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponseMessage {
    pub handler_id: String,
    pub request_id: String,
    pub response: EngineHttpResponse,
}

/// Shared broadcast channel carrying replies between handlers.
#[async_trait]
pub trait ResponseBroker: Send + Sync {
    async fn publish(&self, message: WebhookResponseMessage) -> CoreResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<WebhookResponseMessage>;
}

/// Single-process broker.
pub struct InMemoryBroker {
    sender: broadcast::Sender<WebhookResponseMessage>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROKER_CAPACITY);
        Self { sender }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseBroker for InMemoryBroker {
    async fn publish(&self, message: WebhookResponseMessage) -> CoreResult<()> {
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WebhookResponseMessage> {
        self.sender.subscribe()
    }
}

/// A registered slot; hand it back to [`WebhookResponseWatcher::wait`].
pub struct PendingResponse {
    request_id: String,
    receiver: oneshot::Receiver<EngineHttpResponse>,
}

impl PendingResponse {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Pending-slot registry for one handler instance.
pub struct WebhookResponseWatcher {
    handler_id: String,
    broker: Arc<dyn ResponseBroker>,
    pending: Mutex<HashMap<String, oneshot::Sender<EngineHttpResponse>>>,
    timeout: Duration,
}

impl WebhookResponseWatcher {
    pub fn new(handler_id: impl Into<String>, broker: Arc<dyn ResponseBroker>, timeout: Duration) -> Self {
        Self {
            handler_id: handler_id.into(),
            broker,
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// The id other processes use to address replies to this watcher.
    pub fn handler_id(&self) -> &str {
        &self.handler_id
    }

    /// Create a pending slot for `request_id` on this handler.
    pub async fn register(&self, request_id: &str) -> PendingResponse {
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(request_id.to_string(), sender);
        PendingResponse {
            request_id: request_id.to_string(),
            receiver,
        }
    }

    /// Wait for the reply to a registered slot.
    ///
    /// Answers 504 when nothing arrives within the configured timeout; the
    /// slot is released either way.
    pub async fn wait(&self, pending: PendingResponse) -> EngineHttpResponse {
        let PendingResponse {
            request_id,
            receiver,
        } = pending;
        let outcome = tokio::time::timeout(self.timeout, receiver).await;
        self.pending.lock().await.remove(&request_id);
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                tracing::warn!(request_id = %request_id, "Webhook slot dropped without a reply");
                EngineHttpResponse::gateway_timeout()
            }
            Err(_) => {
                tracing::info!(
                    request_id = %request_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Webhook reply timed out"
                );
                EngineHttpResponse::gateway_timeout()
            }
        }
    }

    /// Drop a slot that will never be waited on.
    pub async fn release(&self, pending: PendingResponse) {
        self.pending.lock().await.remove(&pending.request_id);
    }

    /// Send a reply to whichever handler owns `(request_id, handler_id)`.
    pub async fn publish(
        &self,
        request_id: &str,
        handler_id: &str,
        response: EngineHttpResponse,
    ) -> CoreResult<()> {
        self.broker
            .publish(WebhookResponseMessage {
                handler_id: handler_id.to_string(),
                request_id: request_id.to_string(),
                response,
            })
            .await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Deliver a message to its slot if it is addressed to this watcher.
    ///
    /// Unknown or already consumed request ids are ignored.
    async fn resolve(&self, message: WebhookResponseMessage) {
        if message.handler_id != self.handler_id {
            return;
        }
        let slot = self.pending.lock().await.remove(&message.request_id);
        match slot {
            Some(sender) => {
                let _ = sender.send(message.response);
            }
            None => {
                tracing::debug!(
                    request_id = %message.request_id,
                    "No pending webhook slot for reply"
                );
            }
        }
    }

    /// Subscribe to the broker and spawn the delivery loop.
    ///
    /// The subscription is taken before the task starts, so replies
    /// published after this call returns are never missed.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let receiver = self.broker.subscribe();
        let watcher = Arc::clone(self);
        tokio::spawn(watcher.run(receiver))
    }

    async fn run(self: Arc<Self>, mut receiver: broadcast::Receiver<WebhookResponseMessage>) {
        loop {
            match receiver.recv().await {
                Ok(message) => self.resolve(message).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Webhook response watcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Webhook response channel closed, watcher shutting down");
                    break;
                }
            }
        }
    }
}
