//! Names shared by the run progress event and its WebSocket frame.

/// Event bus `event_type` for a run progress update.
pub const EVENT_FLOW_RUN_PROGRESS: &str = "flow_run.progress";

/// WebSocket frame `type` for a run progress update.
pub const MSG_TYPE_FLOW_RUN_PROGRESS: &str = "flow_run_progress";
