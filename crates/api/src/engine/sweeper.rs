//! Background claim expiry sweeper.
//!
//! Every `interval` puts RUNNING jobs whose claim is older than
//! `claim_timeout` back in the queue. Their tokens are revoked, so a late
//! report from the original claimant fails with a stale claim while the next
//! worker gets a fresh token.

use std::sync::Arc;
use std::time::Duration;

use flowline_core::error::CoreResult;
use flowline_core::queue::JobQueue;
use tokio_util::sync::CancellationToken;

pub struct ClaimSweeper {
    queue: Arc<dyn JobQueue>,
    claim_timeout: Duration,
    interval: Duration,
}

impl ClaimSweeper {
    pub fn new(queue: Arc<dyn JobQueue>, claim_timeout: Duration, interval: Duration) -> Self {
        Self {
            queue,
            claim_timeout,
            interval,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            claim_timeout_secs = self.claim_timeout.as_secs(),
            "Claim sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Claim sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Claim sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep; returns how many jobs were requeued.
    pub async fn sweep(&self) -> CoreResult<u64> {
        let cutoff = chrono::Duration::from_std(self.claim_timeout)
            .ok()
            .and_then(|timeout| chrono::Utc::now().checked_sub_signed(timeout));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let requeued = self.queue.requeue_expired(cutoff).await?;
        if requeued > 0 {
            tracing::warn!(requeued, "Requeued jobs with expired claims");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use flowline_core::error::CoreError;
    use flowline_core::memory::InMemoryJobQueue;
    use flowline_core::queue::{EnqueueJob, JobStatus, JobUpdate, QueueName};

    #[tokio::test]
    async fn expired_claim_is_redelivered_with_new_token() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let job_id = queue
            .enqueue(EnqueueJob::new(QueueName::OneTime, serde_json::json!({})))
            .await
            .unwrap();
        let first = queue.claim(QueueName::OneTime, "worker-1").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let sweeper = ClaimSweeper::new(queue.clone(), Duration::ZERO, Duration::from_secs(1));
        assert_eq!(sweeper.sweep().await.unwrap(), 1);

        let late = queue
            .update(JobUpdate {
                job_id,
                queue_name: QueueName::OneTime,
                status: JobStatus::Completed,
                token: first.token.clone(),
                message: "late".into(),
            })
            .await;
        assert_matches!(late, Err(CoreError::StaleClaim(_)));

        let second = queue.claim(QueueName::OneTime, "worker-2").await.unwrap().unwrap();
        assert_eq!(second.job.id, job_id);
        assert_ne!(second.token, first.token);
        assert_eq!(second.job.attempts, 1);
    }

    #[tokio::test]
    async fn fresh_claims_are_left_alone() {
        let queue = Arc::new(InMemoryJobQueue::new());
        queue
            .enqueue(EnqueueJob::new(QueueName::OneTime, serde_json::json!({})))
            .await
            .unwrap();
        queue.claim(QueueName::OneTime, "worker-1").await.unwrap();

        let sweeper =
            ClaimSweeper::new(queue.clone(), Duration::from_secs(600), Duration::from_secs(1));
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let sweeper = ClaimSweeper::new(queue, Duration::from_secs(1), Duration::from_millis(10));
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), sweeper.run(cancel))
            .await
            .expect("sweeper exits after cancel");
    }
}
