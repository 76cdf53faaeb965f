//! Repository for `project_usage` counters and `project_plans` ceilings.

use flowline_core::types::{DbId, Timestamp};
use sqlx::PgPool;

pub struct UsageRepo;

impl UsageRepo {
    pub async fn tasks_used(
        pool: &PgPool,
        project_id: DbId,
        period_start: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let used = sqlx::query_scalar::<_, i64>(
            "SELECT tasks FROM project_usage WHERE project_id = $1 AND period_start = $2",
        )
        .bind(project_id)
        .bind(period_start)
        .fetch_optional(pool)
        .await?;
        Ok(used.unwrap_or(0))
    }

    /// Add to the period counter, creating it on first use.
    pub async fn add_tasks(
        pool: &PgPool,
        project_id: DbId,
        period_start: Timestamp,
        tasks: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO project_usage (project_id, period_start, tasks) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (project_id, period_start) \
             DO UPDATE SET tasks = project_usage.tasks + EXCLUDED.tasks",
        )
        .bind(project_id)
        .bind(period_start)
        .bind(tasks)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn plan_task_limit(pool: &PgPool, project_id: DbId) -> Result<Option<i64>, sqlx::Error> {
        let limit = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT task_limit FROM project_plans WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
        Ok(limit.flatten())
    }
}
