//! Repository for the `flow_runs` table.
//!
//! Status writes are conditional: callers lock the row with
//! [`FlowRunRepo::find_for_update`] inside a transaction, decide the write
//! against the locked status, then call [`FlowRunRepo::write_status`].

use flowline_core::run::{ExecutionState, PauseMetadata, RunStatus};
use flowline_core::types::{DbId, RunId};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::models::flow_run::FlowRunRow;

/// Column list for `flow_runs` queries.
const COLUMNS: &str = "\
    id, project_id, flow_id, flow_version_id, status, execution_state, \
    tasks, duration, pause_metadata, tags, created_at, updated_at, finished_at";

/// Fields written by a status report.
pub struct StatusWrite<'a> {
    pub status: RunStatus,
    pub tasks: i64,
    pub duration: i64,
    pub execution_state: Option<&'a ExecutionState>,
    pub tags: &'a [String],
}

pub struct FlowRunRepo;

impl FlowRunRepo {
    /// Insert a RUNNING run.
    pub async fn create(
        pool: &PgPool,
        id: RunId,
        project_id: DbId,
        flow_id: DbId,
        flow_version_id: DbId,
    ) -> Result<FlowRunRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO flow_runs (id, project_id, flow_id, flow_version_id, status) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FlowRunRow>(&query)
            .bind(id)
            .bind(project_id)
            .bind(flow_id)
            .bind(flow_version_id)
            .bind(RunStatus::Running.as_str())
            .fetch_one(pool)
            .await
    }

    pub async fn find(
        pool: &PgPool,
        project_id: DbId,
        run_id: RunId,
    ) -> Result<Option<FlowRunRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM flow_runs WHERE id = $1 AND project_id = $2");
        sqlx::query_as::<_, FlowRunRow>(&query)
            .bind(run_id)
            .bind(project_id)
            .fetch_optional(pool)
            .await
    }

    /// Lock a run row for the rest of the transaction.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        project_id: DbId,
        run_id: RunId,
    ) -> Result<Option<FlowRunRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM flow_runs WHERE id = $1 AND project_id = $2 FOR UPDATE"
        );
        sqlx::query_as::<_, FlowRunRow>(&query)
            .bind(run_id)
            .bind(project_id)
            .fetch_optional(conn)
            .await
    }

    /// Write a reported status. Pause metadata is cleared unless the new
    /// status is PAUSED; `finished_at` is stamped for terminal statuses.
    pub async fn write_status(
        conn: &mut PgConnection,
        run_id: RunId,
        write: &StatusWrite<'_>,
    ) -> Result<FlowRunRow, sqlx::Error> {
        let query = format!(
            "UPDATE flow_runs \
             SET status = $2, tasks = $3, duration = $4, execution_state = $5, tags = $6, \
                 pause_metadata = CASE WHEN $2 = 'PAUSED' THEN pause_metadata ELSE NULL END, \
                 finished_at = CASE WHEN $7 THEN NOW() ELSE finished_at END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FlowRunRow>(&query)
            .bind(run_id)
            .bind(write.status.as_str())
            .bind(write.tasks)
            .bind(write.duration)
            .bind(write.execution_state.map(Json))
            .bind(write.tags)
            .bind(write.status.is_terminal())
            .fetch_one(conn)
            .await
    }

    /// Attach pause metadata; only matches a PAUSED run.
    pub async fn set_pause_metadata(
        pool: &PgPool,
        project_id: DbId,
        run_id: RunId,
        metadata: &PauseMetadata,
    ) -> Result<Option<FlowRunRow>, sqlx::Error> {
        let query = format!(
            "UPDATE flow_runs SET pause_metadata = $3 \
             WHERE id = $1 AND project_id = $2 AND status = 'PAUSED' \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FlowRunRow>(&query)
            .bind(run_id)
            .bind(project_id)
            .bind(Json(metadata))
            .fetch_optional(pool)
            .await
    }
}
