//! Repository for the `flows` and `flow_versions` tables.

use flowline_core::flow::FlowStatus;
use flowline_core::types::DbId;
use sqlx::PgPool;

use crate::models::flow::{FlowRow, FlowVersionRow};

/// Column list for `flows` queries.
const FLOW_COLUMNS: &str = "\
    id, project_id, status, published_version_id, consecutive_failures, created_at, updated_at";

/// Column list for `flow_versions` queries.
const VERSION_COLUMNS: &str = "\
    id, flow_id, display_name, trigger, state, created_at, updated_at";

pub struct FlowRepo;

impl FlowRepo {
    pub async fn find(pool: &PgPool, flow_id: DbId) -> Result<Option<FlowRow>, sqlx::Error> {
        let query = format!("SELECT {FLOW_COLUMNS} FROM flows WHERE id = $1");
        sqlx::query_as::<_, FlowRow>(&query)
            .bind(flow_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_in_project(
        pool: &PgPool,
        project_id: DbId,
        flow_id: DbId,
    ) -> Result<Option<FlowRow>, sqlx::Error> {
        let query = format!("SELECT {FLOW_COLUMNS} FROM flows WHERE id = $1 AND project_id = $2");
        sqlx::query_as::<_, FlowRow>(&query)
            .bind(flow_id)
            .bind(project_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_project(pool: &PgPool, project_id: DbId) -> Result<Vec<FlowRow>, sqlx::Error> {
        let query =
            format!("SELECT {FLOW_COLUMNS} FROM flows WHERE project_id = $1 ORDER BY id ASC");
        sqlx::query_as::<_, FlowRow>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find_version(
        pool: &PgPool,
        version_id: DbId,
    ) -> Result<Option<FlowVersionRow>, sqlx::Error> {
        let query = format!("SELECT {VERSION_COLUMNS} FROM flow_versions WHERE id = $1");
        sqlx::query_as::<_, FlowVersionRow>(&query)
            .bind(version_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn latest_version(
        pool: &PgPool,
        flow_id: DbId,
    ) -> Result<Option<FlowVersionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {VERSION_COLUMNS} FROM flow_versions \
             WHERE flow_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, FlowVersionRow>(&query)
            .bind(flow_id)
            .fetch_optional(pool)
            .await
    }

    /// Newest version of each of the given flows.
    pub async fn latest_versions(
        pool: &PgPool,
        flow_ids: &[DbId],
    ) -> Result<Vec<FlowVersionRow>, sqlx::Error> {
        let query = format!(
            "SELECT DISTINCT ON (flow_id) {VERSION_COLUMNS} FROM flow_versions \
             WHERE flow_id = ANY($1) \
             ORDER BY flow_id, created_at DESC, id DESC"
        );
        sqlx::query_as::<_, FlowVersionRow>(&query)
            .bind(flow_ids)
            .fetch_all(pool)
            .await
    }

    pub async fn update_status(
        pool: &PgPool,
        project_id: DbId,
        flow_id: DbId,
        status: FlowStatus,
    ) -> Result<Option<FlowRow>, sqlx::Error> {
        let query = format!(
            "UPDATE flows SET status = $3 WHERE id = $1 AND project_id = $2 RETURNING {FLOW_COLUMNS}"
        );
        sqlx::query_as::<_, FlowRow>(&query)
            .bind(flow_id)
            .bind(project_id)
            .bind(status.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Reset or increment the consecutive trigger failure counter.
    pub async fn record_trigger_outcome(
        pool: &PgPool,
        project_id: DbId,
        flow_id: DbId,
        success: bool,
    ) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE flows \
             SET consecutive_failures = CASE WHEN $3 THEN 0 ELSE consecutive_failures + 1 END \
             WHERE id = $1 AND project_id = $2 \
             RETURNING consecutive_failures",
        )
        .bind(flow_id)
        .bind(project_id)
        .bind(success)
        .fetch_optional(pool)
        .await
    }
}
