//! Postgres implementations of the `flowline_core` storage contracts.

use std::collections::HashMap;

use async_trait::async_trait;
use flowline_core::error::{CoreError, CoreResult};
use flowline_core::flow::{Flow, FlowStatus, FlowVersion, PopulatedFlow};
use flowline_core::queue::{
    check_update, new_claim_token, ClaimedJob, EnqueueJob, Job, JobQueue, JobUpdate, QueueName,
    UpdateOutcome,
};
use flowline_core::run::{
    decide_write, FlowRun, NewFlowRun, PauseMetadata, RunStatusUpdate, RunWrite, RunWriteDecision,
};
use flowline_core::store::{FileStore, FileType, FlowStore, PieceRegistry, RunStore, UsageStore};
use flowline_core::types::{DbId, JobId, RunId, Timestamp};

use crate::repositories::flow_run_repo::StatusWrite;
use crate::repositories::{FileRepo, FlowRepo, FlowRunRepo, JobRepo, PieceRepo, UsageRepo};
use crate::DbPool;

/// Map a sqlx error into the domain taxonomy.
///
/// - `RowNotFound` maps to `NotFound`.
/// - Unique violations on `uq_` constraints map to `Conflict`.
/// - Everything else is logged and becomes `Internal`.
pub fn map_db_error(err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::RowNotFound => CoreError::NotFound {
            entity: "Resource",
            id: "unknown".to_string(),
        },
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some("23505")
                && db_err.constraint().is_some_and(|c| c.starts_with("uq_")) =>
        {
            CoreError::Conflict(format!(
                "Duplicate value violates unique constraint: {}",
                db_err.constraint().unwrap_or("unknown")
            ))
        }
        other => {
            tracing::error!(error = %other, "Database error");
            CoreError::Internal(format!("Database error: {other}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

pub struct PgRunStore {
    pool: DbPool,
}

impl PgRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create(&self, run: NewFlowRun) -> CoreResult<FlowRun> {
        FlowRunRepo::create(
            &self.pool,
            uuid::Uuid::new_v4(),
            run.project_id,
            run.flow_id,
            run.flow_version_id,
        )
        .await
        .map_err(map_db_error)?
        .try_into()
    }

    async fn get(&self, project_id: DbId, run_id: RunId) -> CoreResult<Option<FlowRun>> {
        FlowRunRepo::find(&self.pool, project_id, run_id)
            .await
            .map_err(map_db_error)?
            .map(FlowRun::try_from)
            .transpose()
    }

    async fn update_status(&self, update: RunStatusUpdate) -> CoreResult<RunWrite> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let current: FlowRun =
            FlowRunRepo::find_for_update(&mut tx, update.project_id, update.run_id)
                .await
                .map_err(map_db_error)?
                .ok_or_else(|| CoreError::not_found("FlowRun", update.run_id))?
                .try_into()?;

        match decide_write(current.status, update.status) {
            RunWriteDecision::Apply => {
                let write = StatusWrite {
                    status: update.status,
                    tasks: update.tasks,
                    duration: update.duration,
                    execution_state: update.execution_state.as_ref(),
                    tags: &update.tags,
                };
                let row = FlowRunRepo::write_status(&mut tx, update.run_id, &write)
                    .await
                    .map_err(map_db_error)?;
                tx.commit().await.map_err(map_db_error)?;
                Ok(RunWrite::Applied {
                    run: row.try_into()?,
                    previous: current.status,
                })
            }
            RunWriteDecision::AlreadyApplied => Ok(RunWrite::Unchanged(current)),
            RunWriteDecision::Reject => Ok(RunWrite::Rejected {
                current: current.status,
            }),
        }
    }

    async fn pause(
        &self,
        project_id: DbId,
        run_id: RunId,
        metadata: PauseMetadata,
    ) -> CoreResult<FlowRun> {
        let row = FlowRunRepo::set_pause_metadata(&self.pool, project_id, run_id, &metadata)
            .await
            .map_err(map_db_error)?;
        match row {
            Some(row) => row.try_into(),
            None => Err(CoreError::Conflict(format!(
                "Run {run_id} is not PAUSED in project {project_id}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: EnqueueJob) -> CoreResult<JobId> {
        let run_at = job.run_at(chrono::Utc::now());
        let row = JobRepo::insert(
            &self.pool,
            uuid::Uuid::now_v7(),
            job.queue_name,
            &job.payload,
            job.flow_version_id,
            run_at,
        )
        .await
        .map_err(map_db_error)?;
        Ok(row.id)
    }

    async fn claim(&self, queue: QueueName, worker_id: &str) -> CoreResult<Option<ClaimedJob>> {
        let token = new_claim_token();
        let row = JobRepo::claim_next(&self.pool, queue, worker_id, &token)
            .await
            .map_err(map_db_error)?;
        match row {
            Some(row) => Ok(Some(ClaimedJob {
                job: row.try_into()?,
                token,
            })),
            None => Ok(None),
        }
    }

    async fn update(&self, update: JobUpdate) -> CoreResult<UpdateOutcome> {
        if !update.status.is_resolved() {
            return Err(CoreError::Validation(format!(
                "Job updates must resolve to COMPLETED or FAILED, got {}",
                update.status
            )));
        }
        let changed = JobRepo::resolve(
            &self.pool,
            update.job_id,
            update.queue_name,
            &update.token,
            update.status,
            &update.message,
        )
        .await
        .map_err(map_db_error)?;
        if changed == 1 {
            return Ok(UpdateOutcome::Applied);
        }

        // Nothing matched: classify against the stored row.
        let job: Job = JobRepo::find(&self.pool, update.job_id)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| CoreError::not_found("Job", update.job_id))?
            .try_into()?;
        match check_update(&job, &update)? {
            UpdateOutcome::AlreadyResolved => Ok(UpdateOutcome::AlreadyResolved),
            UpdateOutcome::Applied => Err(CoreError::StaleClaim(format!(
                "Job {} changed while it was being resolved",
                job.id
            ))),
        }
    }

    async fn remove_repeating_job(&self, flow_version_id: DbId) -> CoreResult<u64> {
        JobRepo::delete_repeating(&self.pool, flow_version_id)
            .await
            .map_err(map_db_error)
    }

    async fn requeue_expired(&self, claimed_before: Timestamp) -> CoreResult<u64> {
        JobRepo::requeue_expired(&self.pool, claimed_before)
            .await
            .map_err(map_db_error)
    }

    async fn get(&self, job_id: JobId) -> CoreResult<Option<Job>> {
        JobRepo::find(&self.pool, job_id)
            .await
            .map_err(map_db_error)?
            .map(Job::try_from)
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

pub struct PgFlowStore {
    pool: DbPool,
}

impl PgFlowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlowStore for PgFlowStore {
    async fn get_flow(&self, project_id: DbId, flow_id: DbId) -> CoreResult<Option<Flow>> {
        FlowRepo::find_in_project(&self.pool, project_id, flow_id)
            .await
            .map_err(map_db_error)?
            .map(Flow::try_from)
            .transpose()
    }

    async fn find_flow(&self, flow_id: DbId) -> CoreResult<Option<Flow>> {
        FlowRepo::find(&self.pool, flow_id)
            .await
            .map_err(map_db_error)?
            .map(Flow::try_from)
            .transpose()
    }

    async fn get_version(&self, version_id: DbId) -> CoreResult<Option<FlowVersion>> {
        FlowRepo::find_version(&self.pool, version_id)
            .await
            .map_err(map_db_error)?
            .map(FlowVersion::try_from)
            .transpose()
    }

    async fn latest_version(&self, flow_id: DbId) -> CoreResult<Option<FlowVersion>> {
        FlowRepo::latest_version(&self.pool, flow_id)
            .await
            .map_err(map_db_error)?
            .map(FlowVersion::try_from)
            .transpose()
    }

    async fn list_populated(&self, project_id: DbId) -> CoreResult<Vec<PopulatedFlow>> {
        let flows = FlowRepo::list_by_project(&self.pool, project_id)
            .await
            .map_err(map_db_error)?;
        let ids: Vec<DbId> = flows.iter().map(|f| f.id).collect();
        let mut versions: HashMap<DbId, FlowVersion> = HashMap::new();
        for row in FlowRepo::latest_versions(&self.pool, &ids)
            .await
            .map_err(map_db_error)?
        {
            let version = FlowVersion::try_from(row)?;
            versions.insert(version.flow_id, version);
        }

        let mut populated = Vec::with_capacity(flows.len());
        for row in flows {
            let flow = Flow::try_from(row)?;
            if let Some(version) = versions.remove(&flow.id) {
                populated.push(PopulatedFlow { flow, version });
            }
        }
        Ok(populated)
    }

    async fn update_status(
        &self,
        project_id: DbId,
        flow_id: DbId,
        status: FlowStatus,
    ) -> CoreResult<Flow> {
        FlowRepo::update_status(&self.pool, project_id, flow_id, status)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))?
            .try_into()
    }

    async fn record_trigger_outcome(
        &self,
        project_id: DbId,
        flow_id: DbId,
        success: bool,
    ) -> CoreResult<i32> {
        FlowRepo::record_trigger_outcome(&self.pool, project_id, flow_id, success)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))
    }
}

// ---------------------------------------------------------------------------
// Usage, files, pieces
// ---------------------------------------------------------------------------

pub struct PgUsageStore {
    pool: DbPool,
}

impl PgUsageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn tasks_used(&self, project_id: DbId, period_start: Timestamp) -> CoreResult<i64> {
        UsageRepo::tasks_used(&self.pool, project_id, period_start)
            .await
            .map_err(map_db_error)
    }

    async fn add_tasks(
        &self,
        project_id: DbId,
        period_start: Timestamp,
        tasks: i64,
    ) -> CoreResult<()> {
        UsageRepo::add_tasks(&self.pool, project_id, period_start, tasks)
            .await
            .map_err(map_db_error)
    }

    async fn plan_task_limit(&self, project_id: DbId) -> CoreResult<Option<i64>> {
        UsageRepo::plan_task_limit(&self.pool, project_id)
            .await
            .map_err(map_db_error)
    }
}

pub struct PgFileStore {
    pool: DbPool,
}

impl PgFileStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileStore for PgFileStore {
    async fn get_data(
        &self,
        project_id: DbId,
        file_id: DbId,
        file_type: FileType,
    ) -> CoreResult<Option<Vec<u8>>> {
        FileRepo::get_data(&self.pool, project_id, file_id, file_type)
            .await
            .map_err(map_db_error)
    }
}

pub struct PgPieceRegistry {
    pool: DbPool,
}

impl PgPieceRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PieceRegistry for PgPieceRegistry {
    async fn versions(&self, piece_name: &str) -> CoreResult<Vec<String>> {
        PieceRepo::versions(&self.pool, piece_name)
            .await
            .map_err(map_db_error)
    }
}
