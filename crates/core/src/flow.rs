//! Flow definitions as seen by workers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Enabled,
    Disabled,
}

impl FlowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowStatus::Enabled => "ENABLED",
            FlowStatus::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENABLED" => Ok(FlowStatus::Enabled),
            "DISABLED" => Ok(FlowStatus::Disabled),
            other => Err(CoreError::Validation(format!("Unknown flow status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowVersionState {
    Draft,
    Locked,
}

impl FlowVersionState {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowVersionState::Draft => "DRAFT",
            FlowVersionState::Locked => "LOCKED",
        }
    }
}

impl FromStr for FlowVersionState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(FlowVersionState::Draft),
            "LOCKED" => Ok(FlowVersionState::Locked),
            other => Err(CoreError::Validation(format!(
                "Unknown flow version state '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: DbId,
    pub project_id: DbId,
    pub status: FlowStatus,
    pub published_version_id: Option<DbId>,
    pub consecutive_failures: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One immutable-once-locked revision of a flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersion {
    pub id: DbId,
    pub flow_id: DbId,
    pub display_name: String,
    /// Trigger step with its chain of actions.
    pub trigger: serde_json::Value,
    pub state: FlowVersionState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A flow together with the version a worker should execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedFlow {
    #[serde(flatten)]
    pub flow: Flow,
    pub version: FlowVersion,
}

// ---------------------------------------------------------------------------
// Worker version requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowVersionRequestType {
    Latest,
    Exact,
    Locked,
}

/// Flat query string form of a version request (`?type=EXACT&versionId=7`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersionQuery {
    #[serde(rename = "type")]
    pub kind: FlowVersionRequestType,
    pub flow_id: Option<DbId>,
    pub version_id: Option<DbId>,
}

/// Which version of a flow a worker wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowVersionRequest {
    /// The newest version of the flow.
    Latest { flow_id: DbId },
    /// A specific version.
    Exact { version_id: DbId },
    /// The published version of the flow.
    Locked { flow_id: DbId },
}

impl TryFrom<FlowVersionQuery> for FlowVersionRequest {
    type Error = CoreError;

    fn try_from(query: FlowVersionQuery) -> Result<Self, Self::Error> {
        let missing = |field: &str| CoreError::Validation(format!("{field} is required"));
        match query.kind {
            FlowVersionRequestType::Latest => Ok(FlowVersionRequest::Latest {
                flow_id: query.flow_id.ok_or_else(|| missing("flowId"))?,
            }),
            FlowVersionRequestType::Exact => Ok(FlowVersionRequest::Exact {
                version_id: query.version_id.ok_or_else(|| missing("versionId"))?,
            }),
            FlowVersionRequestType::Locked => Ok(FlowVersionRequest::Locked {
                flow_id: query.flow_id.ok_or_else(|| missing("flowId"))?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn query_converts_to_request() {
        let query = FlowVersionQuery {
            kind: FlowVersionRequestType::Exact,
            flow_id: None,
            version_id: Some(7),
        };
        assert_eq!(
            FlowVersionRequest::try_from(query).unwrap(),
            FlowVersionRequest::Exact { version_id: 7 }
        );
    }

    #[test]
    fn query_without_id_is_rejected() {
        let query = FlowVersionQuery {
            kind: FlowVersionRequestType::Locked,
            flow_id: None,
            version_id: Some(7),
        };
        assert_matches!(
            FlowVersionRequest::try_from(query),
            Err(CoreError::Validation(msg)) if msg.contains("flowId")
        );
    }

    #[test]
    fn flow_status_parses() {
        assert_eq!("DISABLED".parse::<FlowStatus>().unwrap(), FlowStatus::Disabled);
        assert!("PAUSED".parse::<FlowStatus>().is_err());
    }
}
