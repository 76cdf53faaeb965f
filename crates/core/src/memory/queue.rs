use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::queue::{
    check_update, new_claim_token, ClaimedJob, EnqueueJob, Job, JobQueue, JobStatus, JobUpdate,
    QueueName, UpdateOutcome,
};
use crate::types::{DbId, JobId, Timestamp};

/// How long a COMPLETED or FAILED job stays visible for duplicate updates.
pub const RESOLVED_JOB_RETENTION_SECS: i64 = 3600;

pub struct InMemoryJobQueue {
    jobs: Mutex<HashMap<JobId, Job>>,
    retention: Duration,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::with_retention(Duration::seconds(RESOLVED_JOB_RETENTION_SECS))
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved jobs are dropped once they have been resolved for `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn prune_resolved(&self, jobs: &mut HashMap<JobId, Job>) {
        let cutoff = Utc::now() - self.retention;
        jobs.retain(|_, job| !(job.status.is_resolved() && job.updated_at <= cutoff));
    }

    /// Every job currently held, oldest first.
    pub async fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, input: EnqueueJob) -> CoreResult<JobId> {
        let now = Utc::now();
        let job = Job {
            id: uuid::Uuid::now_v7(),
            queue_name: input.queue_name,
            status: JobStatus::Queued,
            run_at: input.run_at(now),
            payload: input.payload,
            flow_version_id: input.flow_version_id,
            claim_token: None,
            claimed_by: None,
            claimed_at: None,
            message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        let id = job.id;
        let mut jobs = self.jobs.lock().await;
        self.prune_resolved(&mut jobs);
        jobs.insert(id, job);
        Ok(id)
    }

    async fn claim(&self, queue: QueueName, worker_id: &str) -> CoreResult<Option<ClaimedJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .values_mut()
            .filter(|job| {
                job.queue_name == queue && job.status == JobStatus::Queued && job.run_at <= now
            })
            .min_by_key(|job| (job.run_at, job.created_at));

        let Some(job) = next else {
            return Ok(None);
        };
        let token = new_claim_token();
        job.status = JobStatus::Running;
        job.claim_token = Some(token.clone());
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.updated_at = now;

        Ok(Some(ClaimedJob {
            job: job.clone(),
            token,
        }))
    }

    async fn update(&self, update: JobUpdate) -> CoreResult<UpdateOutcome> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&update.job_id)
            .ok_or_else(|| CoreError::not_found("Job", update.job_id))?;

        let outcome = check_update(job, &update)?;
        if outcome == UpdateOutcome::Applied {
            job.status = update.status;
            job.message = Some(update.message);
            job.updated_at = Utc::now();
        }
        Ok(outcome)
    }

    async fn remove_repeating_job(&self, flow_version_id: DbId) -> CoreResult<u64> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.queue_name == QueueName::Repeating
                && job.status == JobStatus::Queued
                && job.flow_version_id == Some(flow_version_id))
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn requeue_expired(&self, claimed_before: Timestamp) -> CoreResult<u64> {
        let now = Utc::now();
        let mut requeued = 0;
        for job in self.jobs.lock().await.values_mut() {
            let expired = job.status == JobStatus::Running
                && job.claimed_at.is_some_and(|at| at < claimed_before);
            if expired {
                job.status = JobStatus::Queued;
                job.claim_token = None;
                job.claimed_by = None;
                job.claimed_at = None;
                job.run_at = now;
                job.attempts += 1;
                job.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn get(&self, job_id: JobId) -> CoreResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }
}
