use flowline_core::error::CoreError;
use flowline_core::run::{ExecutionState, FlowRun, PauseMetadata};
use flowline_core::types::{DbId, RunId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `flow_runs` table.
#[derive(Debug, Clone, FromRow)]
pub struct FlowRunRow {
    pub id: RunId,
    pub project_id: DbId,
    pub flow_id: DbId,
    pub flow_version_id: DbId,
    pub status: String,
    pub execution_state: Option<Json<ExecutionState>>,
    pub tasks: i64,
    pub duration: i64,
    pub pause_metadata: Option<Json<PauseMetadata>>,
    pub tags: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl TryFrom<FlowRunRow> for FlowRun {
    type Error = CoreError;

    fn try_from(row: FlowRunRow) -> Result<Self, Self::Error> {
        Ok(FlowRun {
            id: row.id,
            project_id: row.project_id,
            flow_id: row.flow_id,
            flow_version_id: row.flow_version_id,
            status: row.status.parse()?,
            execution_state: row.execution_state.map(|Json(state)| state),
            tasks: row.tasks,
            duration: row.duration,
            pause_metadata: row.pause_metadata.map(|Json(meta)| meta),
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}
