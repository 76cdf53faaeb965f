//! Cross-process webhook reply broker over Postgres `LISTEN/NOTIFY`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowline_core::error::{CoreError, CoreResult};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;

use crate::webhook::{ResponseBroker, WebhookResponseMessage};

/// Notification channel shared by every API process.
pub const WEBHOOK_RESPONSE_CHANNEL: &str = "flowline_webhook_responses";

/// Local fan-out capacity for received notifications.
const LOCAL_CAPACITY: usize = 256;

/// Pause between listener errors before receiving again.
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct PgNotifyBroker {
    pool: PgPool,
    local: broadcast::Sender<WebhookResponseMessage>,
}

impl PgNotifyBroker {
    /// Start listening and return the broker plus its listener task.
    pub async fn start(
        pool: PgPool,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), sqlx::Error> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(WEBHOOK_RESPONSE_CHANNEL).await?;

        let (local, _) = broadcast::channel(LOCAL_CAPACITY);
        let forward = local.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<WebhookResponseMessage>(notification.payload())
                        {
                            Ok(message) => {
                                let _ = forward.send(message);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Discarding malformed webhook reply notification");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Webhook reply listener failed");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        });

        tracing::info!(channel = WEBHOOK_RESPONSE_CHANNEL, "Listening for webhook replies");
        Ok((Arc::new(Self { pool, local }), handle))
    }
}

#[async_trait]
impl ResponseBroker for PgNotifyBroker {
    async fn publish(&self, message: WebhookResponseMessage) -> CoreResult<()> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| CoreError::Internal(format!("Failed to encode webhook reply: {e}")))?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(WEBHOOK_RESPONSE_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to publish webhook reply: {e}")))?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WebhookResponseMessage> {
        self.local.subscribe()
    }
}
