//! Durable job queue contract.
//!
//! Delivery is at-least-once. A claim issues an opaque token and every status
//! mutation must present it. Repeating a resolution with the outstanding token
//! and the same status is a no-op; a token that is not the outstanding one is
//! always rejected.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{DbId, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Names and statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueName {
    OneTime,
    Repeating,
    Webhook,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::OneTime, QueueName::Repeating, QueueName::Webhook];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::OneTime => "ONE_TIME",
            QueueName::Repeating => "REPEATING",
            QueueName::Webhook => "WEBHOOK",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown queue '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// COMPLETED and FAILED.
    pub fn is_resolved(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// One queue entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue_name: QueueName,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    /// Set for scheduled trigger instances so they can be purged per version.
    pub flow_version_id: Option<DbId>,
    pub run_at: Timestamp,
    #[serde(skip_serializing)]
    pub claim_token: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub message: Option<String>,
    pub attempts: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for [`JobQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueJob {
    pub queue_name: QueueName,
    pub payload: serde_json::Value,
    pub delay: Option<Duration>,
    pub flow_version_id: Option<DbId>,
}

impl EnqueueJob {
    pub fn new(queue_name: QueueName, payload: serde_json::Value) -> Self {
        Self {
            queue_name,
            payload,
            delay: None,
            flow_version_id: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn for_flow_version(mut self, flow_version_id: DbId) -> Self {
        self.flow_version_id = Some(flow_version_id);
        self
    }

    /// The timestamp at which the job becomes claimable.
    pub fn run_at(&self, now: Timestamp) -> Timestamp {
        match self.delay.and_then(|d| chrono::Duration::from_std(d).ok()) {
            Some(delay) => now + delay,
            None => now,
        }
    }
}

/// A job handed to a worker together with the token that proves ownership.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub token: String,
}

/// A worker-requested status mutation.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub queue_name: QueueName,
    pub status: JobStatus,
    pub token: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The job was already resolved to the same status under the same claim.
    AlreadyResolved,
}

/// Issue a fresh opaque claim token.
pub fn new_claim_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Decide how an update applies to the stored job.
///
/// Token mismatch is checked before idempotence so a stale claimant can never
/// observe success, even for a job another claimant already resolved.
pub fn check_update(job: &Job, update: &JobUpdate) -> CoreResult<UpdateOutcome> {
    if !update.status.is_resolved() {
        return Err(CoreError::Validation(format!(
            "Job updates must resolve to COMPLETED or FAILED, got {}",
            update.status
        )));
    }
    if job.queue_name != update.queue_name {
        return Err(CoreError::not_found("Job", job.id));
    }
    if job.claim_token.as_deref() != Some(update.token.as_str()) {
        return Err(CoreError::StaleClaim(format!(
            "Job {} is not claimed by the presented token",
            job.id
        )));
    }
    match job.status {
        JobStatus::Running => Ok(UpdateOutcome::Applied),
        status if status == update.status => Ok(UpdateOutcome::AlreadyResolved),
        status if status.is_resolved() => Err(CoreError::Conflict(format!(
            "Job {} already resolved as {status}, refusing {}",
            job.id, update.status
        ))),
        _ => Err(CoreError::StaleClaim(format!(
            "Job {} is not currently claimed",
            job.id
        ))),
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job; it becomes claimable after its optional delay.
    async fn enqueue(&self, job: EnqueueJob) -> CoreResult<JobId>;

    /// Claim the oldest due job in `queue`. No two callers ever claim the same job.
    async fn claim(&self, queue: QueueName, worker_id: &str) -> CoreResult<Option<ClaimedJob>>;

    /// Resolve a claimed job. See [`check_update`] for the rules.
    async fn update(&self, update: JobUpdate) -> CoreResult<UpdateOutcome>;

    /// Remove every unclaimed REPEATING instance scheduled for a flow version.
    async fn remove_repeating_job(&self, flow_version_id: DbId) -> CoreResult<u64>;

    /// Put RUNNING jobs claimed before `claimed_before` back in the queue.
    ///
    /// Their tokens are revoked, so late reports from the old claimant fail.
    async fn requeue_expired(&self, claimed_before: Timestamp) -> CoreResult<u64>;

    async fn get(&self, job_id: JobId) -> CoreResult<Option<Job>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn running_job(token: &str) -> Job {
        let now = chrono::Utc::now();
        Job {
            id: uuid::Uuid::new_v4(),
            queue_name: QueueName::OneTime,
            status: JobStatus::Running,
            payload: serde_json::json!({}),
            flow_version_id: None,
            run_at: now,
            claim_token: Some(token.to_string()),
            claimed_by: Some("worker-1".into()),
            claimed_at: Some(now),
            message: None,
            attempts: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn update_for(job: &Job, token: &str, status: JobStatus) -> JobUpdate {
        JobUpdate {
            job_id: job.id,
            queue_name: job.queue_name,
            status,
            token: token.to_string(),
            message: "done".into(),
        }
    }

    #[test]
    fn matching_token_applies() {
        let job = running_job("t1");
        let outcome = check_update(&job, &update_for(&job, "t1", JobStatus::Completed));
        assert_matches!(outcome, Ok(UpdateOutcome::Applied));
    }

    #[test]
    fn mismatched_token_is_stale() {
        let job = running_job("t1");
        let outcome = check_update(&job, &update_for(&job, "t2", JobStatus::Completed));
        assert_matches!(outcome, Err(CoreError::StaleClaim(_)));
    }

    #[test]
    fn repeated_resolution_is_idempotent() {
        let mut job = running_job("t1");
        job.status = JobStatus::Completed;
        let outcome = check_update(&job, &update_for(&job, "t1", JobStatus::Completed));
        assert_matches!(outcome, Ok(UpdateOutcome::AlreadyResolved));
    }

    #[test]
    fn stale_token_on_resolved_job_still_fails() {
        let mut job = running_job("t1");
        job.status = JobStatus::Completed;
        let outcome = check_update(&job, &update_for(&job, "t0", JobStatus::Completed));
        assert_matches!(outcome, Err(CoreError::StaleClaim(_)));
    }

    #[test]
    fn different_resolution_conflicts() {
        let mut job = running_job("t1");
        job.status = JobStatus::Completed;
        let outcome = check_update(&job, &update_for(&job, "t1", JobStatus::Failed));
        assert_matches!(outcome, Err(CoreError::Conflict(_)));
    }

    #[test]
    fn non_resolving_status_is_invalid() {
        let job = running_job("t1");
        let outcome = check_update(&job, &update_for(&job, "t1", JobStatus::Running));
        assert_matches!(outcome, Err(CoreError::Validation(_)));
    }

    #[test]
    fn delay_moves_run_at() {
        let now = chrono::Utc::now();
        let job = EnqueueJob::new(QueueName::OneTime, serde_json::json!({}))
            .with_delay(Duration::from_secs(60));
        assert_eq!(job.run_at(now), now + chrono::Duration::seconds(60));
    }
}
