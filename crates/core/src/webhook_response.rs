//! HTTP replies handed back to a synchronous webhook caller.
//!
//! The reply is derived from the reported run outcome, so a caller waiting on
//! a paused or finished run is answered before the run record is written.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::run::{PauseDetails, RunOutcome};

pub const STATUS_OK: u16 = 200;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;
pub const STATUS_GATEWAY_TIMEOUT: u16 = 504;

/// An HTTP-shaped response produced by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHttpResponse {
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl EngineHttpResponse {
    fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body,
            headers: BTreeMap::new(),
        }
    }

    pub fn no_content() -> Self {
        Self::new(STATUS_NO_CONTENT, serde_json::json!({}))
    }

    /// The reply for a caller whose run did not answer in time.
    pub fn gateway_timeout() -> Self {
        Self::new(
            STATUS_GATEWAY_TIMEOUT,
            serde_json::json!({ "message": "The request took too long to reply" }),
        )
    }

    /// Derive the reply for a reported outcome.
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Paused {
                pause_metadata: PauseDetails::Webhook { response, .. },
            } => Self {
                status: response.status.unwrap_or(STATUS_OK),
                body: response.body.clone(),
                headers: response.headers.clone(),
            },
            RunOutcome::Paused {
                pause_metadata: PauseDetails::Delay { .. },
            } => Self::no_content(),
            RunOutcome::Stopped { stop_response } => match stop_response {
                Some(template) => Self {
                    status: template.status.unwrap_or(STATUS_OK),
                    body: template.body.clone(),
                    headers: template.headers.clone(),
                },
                None => Self::new(STATUS_OK, serde_json::Value::Null),
            },
            RunOutcome::InternalError { .. } => Self::new(
                STATUS_INTERNAL_SERVER_ERROR,
                serde_json::json!({ "message": "An internal error has occurred" }),
            ),
            RunOutcome::Failed => Self::new(
                STATUS_INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "message": "The flow has failed and there is no response returned"
                }),
            ),
            RunOutcome::Timeout | RunOutcome::Running => Self::gateway_timeout(),
            RunOutcome::Succeeded | RunOutcome::QuotaExceeded => Self::no_content(),
        }
    }
}
