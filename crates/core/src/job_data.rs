//! Payloads carried by queue jobs.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::run::ProgressUpdateType;
use crate::types::{DbId, RunId};

/// What a worker is asked to do when it claims a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobData {
    /// Execute a freshly created run from its trigger payload.
    #[serde(rename_all = "camelCase")]
    ExecuteRun {
        run_id: RunId,
        project_id: DbId,
        flow_id: DbId,
        flow_version_id: DbId,
        #[serde(default)]
        trigger_payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        synchronous_handler_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_request_id: Option<String>,
        #[serde(default)]
        progress_update_type: ProgressUpdateType,
    },
    /// Continue a PAUSED run once its delay has elapsed.
    #[serde(rename_all = "camelCase")]
    ResumeRun {
        run_id: RunId,
        project_id: DbId,
        flow_id: DbId,
        flow_version_id: DbId,
    },
    /// Poll a scheduled trigger of a flow version.
    #[serde(rename_all = "camelCase")]
    ScheduledTrigger {
        project_id: DbId,
        flow_id: DbId,
        flow_version_id: DbId,
    },
}

impl JobData {
    pub fn project_id(&self) -> DbId {
        match self {
            JobData::ExecuteRun { project_id, .. }
            | JobData::ResumeRun { project_id, .. }
            | JobData::ScheduledTrigger { project_id, .. } => *project_id,
        }
    }

    pub fn to_payload(&self) -> CoreResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::Internal(format!("Failed to encode job payload: {e}")))
    }

    pub fn from_payload(payload: &serde_json::Value) -> CoreResult<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| CoreError::Validation(format!("Malformed job payload: {e}")))
    }
}
