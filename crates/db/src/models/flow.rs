use flowline_core::error::CoreError;
use flowline_core::flow::{Flow, FlowVersion};
use flowline_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `flows` table.
#[derive(Debug, Clone, FromRow)]
pub struct FlowRow {
    pub id: DbId,
    pub project_id: DbId,
    pub status: String,
    pub published_version_id: Option<DbId>,
    pub consecutive_failures: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `flow_versions` table.
#[derive(Debug, Clone, FromRow)]
pub struct FlowVersionRow {
    pub id: DbId,
    pub flow_id: DbId,
    pub display_name: String,
    pub trigger: serde_json::Value,
    pub state: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<FlowRow> for Flow {
    type Error = CoreError;

    fn try_from(row: FlowRow) -> Result<Self, Self::Error> {
        Ok(Flow {
            id: row.id,
            project_id: row.project_id,
            status: row.status.parse()?,
            published_version_id: row.published_version_id,
            consecutive_failures: row.consecutive_failures,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<FlowVersionRow> for FlowVersion {
    type Error = CoreError;

    fn try_from(row: FlowVersionRow) -> Result<Self, Self::Error> {
        Ok(FlowVersion {
            id: row.id,
            flow_id: row.flow_id,
            display_name: row.display_name,
            trigger: row.trigger,
            state: row.state.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
