//! Flow run model, worker progress reports and the run status state machine.
//!
//! A run is created RUNNING when its job is dispatched and is mutated only by
//! worker reports. RUNNING and PAUSED may still move; every other status is
//! terminal.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, RunId, Timestamp};

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Stopped,
    Paused,
    Timeout,
    QuotaExceeded,
    InternalError,
}

impl RunStatus {
    pub const ALL: [RunStatus; 8] = [
        RunStatus::Running,
        RunStatus::Succeeded,
        RunStatus::Failed,
        RunStatus::Stopped,
        RunStatus::Paused,
        RunStatus::Timeout,
        RunStatus::QuotaExceeded,
        RunStatus::InternalError,
    ];

    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Stopped => "STOPPED",
            RunStatus::Paused => "PAUSED",
            RunStatus::Timeout => "TIMEOUT",
            RunStatus::QuotaExceeded => "QUOTA_EXCEEDED",
            RunStatus::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Everything except RUNNING and PAUSED.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running | RunStatus::Paused)
    }

    /// The status that is actually persisted for a reported status.
    ///
    /// A flow that chose to stop early is a successful run.
    pub fn normalized(self) -> Self {
        match self {
            RunStatus::Stopped => RunStatus::Succeeded,
            other => other,
        }
    }

    /// Statuses whose partial step outputs are dropped on persist.
    pub fn discards_execution_state(self) -> bool {
        matches!(
            self,
            RunStatus::Timeout | RunStatus::QuotaExceeded | RunStatus::InternalError
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown run status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::RunStatus;
    use super::RunStatus::*;

    /// Returns the statuses a run may be written to from `from`.
    ///
    /// RUNNING -> RUNNING is an informational progress report. A PAUSED run
    /// may be paused again by a resumed execution that never reported
    /// RUNNING in between.
    pub fn valid_transitions(from: RunStatus) -> &'static [RunStatus] {
        match from {
            Running => &[
                Running,
                Succeeded,
                Failed,
                Stopped,
                Timeout,
                QuotaExceeded,
                InternalError,
                Paused,
            ],
            Paused => &[
                Running,
                Paused,
                Succeeded,
                Failed,
                Stopped,
                Timeout,
                QuotaExceeded,
                InternalError,
            ],
            Succeeded | Failed | Stopped | Timeout | QuotaExceeded | InternalError => &[],
        }
    }

    /// Check whether a write from `from` to `to` is valid.
    pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, returning a readable message for invalid ones.
    pub fn validate_transition(from: RunStatus, to: RunStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!("Invalid run transition: {from} -> {to}"))
        }
    }
}

/// How a conditional run write should be treated given the stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunWriteDecision {
    /// The transition is allowed; write it.
    Apply,
    /// The run already sits in the requested terminal status (duplicate report).
    AlreadyApplied,
    /// The run is terminal with a different status.
    Reject,
}

/// Decide what a write of `target` against a run currently in `current` does.
pub fn decide_write(current: RunStatus, target: RunStatus) -> RunWriteDecision {
    if state_machine::can_transition(current, target) {
        RunWriteDecision::Apply
    } else if current.is_terminal() && current == target {
        RunWriteDecision::AlreadyApplied
    } else {
        RunWriteDecision::Reject
    }
}

// ---------------------------------------------------------------------------
// Step outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutputStatus {
    Running,
    Succeeded,
    Failed,
    Paused,
    Stopped,
}

/// The recorded result of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: StepOutputStatus,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

/// Step name -> output map persisted on the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub steps: BTreeMap<String, StepOutput>,
}

// ---------------------------------------------------------------------------
// Pause metadata
// ---------------------------------------------------------------------------

/// An HTTP-shaped reply a flow asked the platform to send on its behalf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseType {
    Delay,
    Webhook,
}

/// Pause payload supplied by the worker; the shape depends on the pause type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseDetails {
    #[serde(rename_all = "camelCase")]
    Delay {
        resume_date_time: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id_to_reply: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Webhook {
        request_id: String,
        #[serde(default)]
        response: ResponseTemplate,
    },
}

impl PauseDetails {
    pub fn pause_type(&self) -> PauseType {
        match self {
            PauseDetails::Delay { .. } => PauseType::Delay,
            PauseDetails::Webhook { .. } => PauseType::Webhook,
        }
    }
}

/// How a worker wants progress delivered back to the original caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressUpdateType {
    #[default]
    None,
    WebhookResponse,
    TestFlow,
}

/// Everything persisted on a PAUSED run so it can be resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseMetadata {
    pub progress_update_type: ProgressUpdateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_id: Option<String>,
    pub pause: PauseDetails,
}

// ---------------------------------------------------------------------------
// Worker reports
// ---------------------------------------------------------------------------

/// The reported status, carrying the payload that only makes sense for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Running,
    Succeeded,
    Failed,
    #[serde(rename_all = "camelCase")]
    Stopped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_response: Option<ResponseTemplate>,
    },
    #[serde(rename_all = "camelCase")]
    Paused { pause_metadata: PauseDetails },
    Timeout,
    QuotaExceeded,
    #[serde(rename_all = "camelCase")]
    InternalError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<serde_json::Value>,
    },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Running => RunStatus::Running,
            RunOutcome::Succeeded => RunStatus::Succeeded,
            RunOutcome::Failed => RunStatus::Failed,
            RunOutcome::Stopped { .. } => RunStatus::Stopped,
            RunOutcome::Paused { .. } => RunStatus::Paused,
            RunOutcome::Timeout => RunStatus::Timeout,
            RunOutcome::QuotaExceeded => RunStatus::QuotaExceeded,
            RunOutcome::InternalError { .. } => RunStatus::InternalError,
        }
    }
}

/// Run details a worker sends with every progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    #[serde(flatten)]
    pub outcome: RunOutcome,
    #[serde(default)]
    pub tasks: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub steps: BTreeMap<String, StepOutput>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RunDetails {
    pub fn status(&self) -> RunStatus {
        self.outcome.status()
    }

    /// Execution state to persist: none for statuses that discard partial state.
    pub fn execution_state(&self) -> Option<ExecutionState> {
        if self.status().discards_execution_state() {
            None
        } else {
            Some(ExecutionState {
                steps: self.steps.clone(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// FlowRun
// ---------------------------------------------------------------------------

/// One execution attempt of a flow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRun {
    pub id: RunId,
    pub project_id: DbId,
    pub flow_id: DbId,
    pub flow_version_id: DbId,
    pub status: RunStatus,
    pub execution_state: Option<ExecutionState>,
    pub tasks: i64,
    pub duration: i64,
    pub pause_metadata: Option<PauseMetadata>,
    pub tags: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

/// Input for creating a run at dispatch time.
#[derive(Debug, Clone)]
pub struct NewFlowRun {
    pub project_id: DbId,
    pub flow_id: DbId,
    pub flow_version_id: DbId,
}

/// A status write derived from a worker report.
#[derive(Debug, Clone)]
pub struct RunStatusUpdate {
    pub run_id: RunId,
    pub project_id: DbId,
    /// Already normalized; never STOPPED.
    pub status: RunStatus,
    pub tasks: i64,
    pub duration: i64,
    pub execution_state: Option<ExecutionState>,
    pub tags: Vec<String>,
}

impl RunStatusUpdate {
    /// Build the persisted write for a report.
    pub fn from_report(run_id: RunId, project_id: DbId, details: &RunDetails) -> Self {
        Self {
            run_id,
            project_id,
            status: details.status().normalized(),
            tasks: details.tasks.max(0),
            duration: details.duration.max(0),
            execution_state: details.execution_state(),
            tags: dedupe_tags(&details.tags),
        }
    }
}

/// Result of a conditional run status write.
#[derive(Debug, Clone)]
pub enum RunWrite {
    /// The write was applied; `previous` is the status it replaced.
    Applied { run: FlowRun, previous: RunStatus },
    /// The run already held the same terminal status; nothing was written.
    Unchanged(FlowRun),
    /// The run is terminal with a different status; nothing was written.
    Rejected { current: RunStatus },
}

/// Keep the first occurrence of every tag, preserving order.
pub fn dedupe_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.contains(tag) {
            out.push(tag.clone());
        }
    }
    out
}
