//! Repository for the `queue_jobs` table.
//!
//! Claims use `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent pollers never
//! receive the same row. Resolutions are conditional on the claim token and
//! on the job still being RUNNING.

use flowline_core::queue::{JobStatus, QueueName};
use flowline_core::types::{DbId, JobId, Timestamp};
use sqlx::PgPool;

use crate::models::job::JobRow;

/// Column list for `queue_jobs` queries.
const COLUMNS: &str = "\
    id, queue_name, status, payload, flow_version_id, run_at, \
    claim_token, claimed_by, claimed_at, message, attempts, created_at, updated_at";

pub struct JobRepo;

impl JobRepo {
    pub async fn insert(
        pool: &PgPool,
        id: JobId,
        queue_name: QueueName,
        payload: &serde_json::Value,
        flow_version_id: Option<DbId>,
        run_at: Timestamp,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO queue_jobs (id, queue_name, status, payload, flow_version_id, run_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(queue_name.as_str())
            .bind(JobStatus::Queued.as_str())
            .bind(payload)
            .bind(flow_version_id)
            .bind(run_at)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest due job of a queue.
    pub async fn claim_next(
        pool: &PgPool,
        queue_name: QueueName,
        worker_id: &str,
        token: &str,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE queue_jobs \
             SET status = $4, claim_token = $3, claimed_by = $2, claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM queue_jobs \
                 WHERE queue_name = $1 AND status = $5 AND run_at <= NOW() \
                 ORDER BY run_at ASC, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(queue_name.as_str())
            .bind(worker_id)
            .bind(token)
            .bind(JobStatus::Running.as_str())
            .bind(JobStatus::Queued.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Resolve a RUNNING job held by `token`. Returns the number of rows changed.
    pub async fn resolve(
        pool: &PgPool,
        job_id: JobId,
        queue_name: QueueName,
        token: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE queue_jobs SET status = $4, message = $5 \
             WHERE id = $1 AND queue_name = $2 AND claim_token = $3 AND status = $6",
        )
        .bind(job_id)
        .bind(queue_name.as_str())
        .bind(token)
        .bind(status.as_str())
        .bind(message)
        .bind(JobStatus::Running.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find(pool: &PgPool, job_id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM queue_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Delete unclaimed REPEATING instances of a flow version.
    pub async fn delete_repeating(pool: &PgPool, flow_version_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM queue_jobs \
             WHERE queue_name = $1 AND status = $2 AND flow_version_id = $3",
        )
        .bind(QueueName::Repeating.as_str())
        .bind(JobStatus::Queued.as_str())
        .bind(flow_version_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Return RUNNING jobs claimed before `claimed_before` to the queue.
    pub async fn requeue_expired(pool: &PgPool, claimed_before: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE queue_jobs \
             SET status = $1, claim_token = NULL, claimed_by = NULL, claimed_at = NULL, \
                 run_at = NOW(), attempts = attempts + 1 \
             WHERE status = $2 AND claimed_at < $3",
        )
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::Running.as_str())
        .bind(claimed_before)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
