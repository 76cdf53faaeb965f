use flowline_core::error::CoreError;
use flowline_core::queue::Job;
use flowline_core::types::{DbId, JobId, Timestamp};
use sqlx::FromRow;

/// A row from the `queue_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub queue_name: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub flow_version_id: Option<DbId>,
    pub run_at: Timestamp,
    pub claim_token: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub message: Option<String>,
    pub attempts: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            queue_name: row.queue_name.parse()?,
            status: row.status.parse()?,
            payload: row.payload,
            flow_version_id: row.flow_version_id,
            run_at: row.run_at,
            claim_token: row.claim_token,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            message: row.message,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
