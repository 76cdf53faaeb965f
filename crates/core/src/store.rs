//! Storage contracts consumed by the run lifecycle coordinator.
//!
//! Each contract has an in-memory implementation in [`crate::memory`] for
//! single-process deployments and tests, and a Postgres implementation in the
//! `flowline-db` crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::flow::{Flow, FlowStatus, FlowVersion, PopulatedFlow};
use crate::run::{FlowRun, NewFlowRun, PauseMetadata, RunStatusUpdate, RunWrite};
use crate::types::{DbId, RunId, Timestamp};

/// Durable record of every flow run.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a RUNNING run.
    async fn create(&self, run: NewFlowRun) -> CoreResult<FlowRun>;

    /// Fetch a run, scoped to its project.
    async fn get(&self, project_id: DbId, run_id: RunId) -> CoreResult<Option<FlowRun>>;

    /// Conditionally write a reported status.
    ///
    /// The write only lands when the stored status may transition to the
    /// target (see [`crate::run::decide_write`]); pause metadata is cleared
    /// whenever the new status is not PAUSED. Fails with `NotFound` when the
    /// run does not exist in `update.project_id`.
    async fn update_status(&self, update: RunStatusUpdate) -> CoreResult<RunWrite>;

    /// Attach pause metadata to a PAUSED run.
    async fn pause(
        &self,
        project_id: DbId,
        run_id: RunId,
        metadata: PauseMetadata,
    ) -> CoreResult<FlowRun>;
}

/// Flow definitions and their mutable status.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn get_flow(&self, project_id: DbId, flow_id: DbId) -> CoreResult<Option<Flow>>;

    /// Unscoped lookup used by public webhook ingress, which has no principal.
    async fn find_flow(&self, flow_id: DbId) -> CoreResult<Option<Flow>>;

    async fn get_version(&self, version_id: DbId) -> CoreResult<Option<FlowVersion>>;

    /// The most recently created version of a flow.
    async fn latest_version(&self, flow_id: DbId) -> CoreResult<Option<FlowVersion>>;

    /// Every flow of a project with its latest version.
    async fn list_populated(&self, project_id: DbId) -> CoreResult<Vec<PopulatedFlow>>;

    async fn update_status(
        &self,
        project_id: DbId,
        flow_id: DbId,
        status: FlowStatus,
    ) -> CoreResult<Flow>;

    /// Reset (success) or increment (failure) the consecutive trigger failure
    /// counter, returning the new value.
    async fn record_trigger_outcome(
        &self,
        project_id: DbId,
        flow_id: DbId,
        success: bool,
    ) -> CoreResult<i32>;
}

/// Per-project, per-period task counters and plan ceilings.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn tasks_used(&self, project_id: DbId, period_start: Timestamp) -> CoreResult<i64>;

    async fn add_tasks(&self, project_id: DbId, period_start: Timestamp, tasks: i64)
        -> CoreResult<()>;

    /// `None` when the project has no plan ceiling.
    async fn plan_task_limit(&self, project_id: DbId) -> CoreResult<Option<i64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    PackageArchive,
    FlowRunLog,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::PackageArchive => "PACKAGE_ARCHIVE",
            FileType::FlowRunLog => "FLOW_RUN_LOG",
        }
    }
}

/// Binary blobs referenced by jobs.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// A file's bytes, or `None` when it does not exist in `project_id`.
    async fn get_data(
        &self,
        project_id: DbId,
        file_id: DbId,
        file_type: FileType,
    ) -> CoreResult<Option<Vec<u8>>>;
}

/// Catalogue of published piece versions.
#[async_trait]
pub trait PieceRegistry: Send + Sync {
    async fn versions(&self, piece_name: &str) -> CoreResult<Vec<String>>;
}

/// Deregistration path of a flow version's trigger.
#[async_trait]
pub trait TriggerHooks: Send + Sync {
    async fn disable(&self, project_id: DbId, version: &FlowVersion) -> CoreResult<()>;
}
