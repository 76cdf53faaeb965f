use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::run::{
    decide_write, FlowRun, NewFlowRun, PauseMetadata, RunStatus, RunStatusUpdate, RunWrite,
    RunWriteDecision,
};
use crate::store::RunStore;
use crate::types::{DbId, RunId};

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, FlowRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, input: NewFlowRun) -> CoreResult<FlowRun> {
        let now = Utc::now();
        let run = FlowRun {
            id: uuid::Uuid::new_v4(),
            project_id: input.project_id,
            flow_id: input.flow_id,
            flow_version_id: input.flow_version_id,
            status: RunStatus::Running,
            execution_state: None,
            tasks: 0,
            duration: 0,
            pause_metadata: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, project_id: DbId, run_id: RunId) -> CoreResult<Option<FlowRun>> {
        Ok(self
            .runs
            .read()
            .await
            .get(&run_id)
            .filter(|run| run.project_id == project_id)
            .cloned())
    }

    async fn update_status(&self, update: RunStatusUpdate) -> CoreResult<RunWrite> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&update.run_id)
            .filter(|run| run.project_id == update.project_id)
            .ok_or_else(|| CoreError::not_found("FlowRun", update.run_id))?;

        match decide_write(run.status, update.status) {
            RunWriteDecision::Apply => {
                let now = Utc::now();
                let previous = run.status;
                run.status = update.status;
                run.tasks = update.tasks;
                run.duration = update.duration;
                run.execution_state = update.execution_state;
                run.tags = update.tags;
                if update.status != RunStatus::Paused {
                    run.pause_metadata = None;
                }
                if update.status.is_terminal() {
                    run.finished_at = Some(now);
                }
                run.updated_at = now;
                Ok(RunWrite::Applied {
                    run: run.clone(),
                    previous,
                })
            }
            RunWriteDecision::AlreadyApplied => Ok(RunWrite::Unchanged(run.clone())),
            RunWriteDecision::Reject => Ok(RunWrite::Rejected {
                current: run.status,
            }),
        }
    }

    async fn pause(
        &self,
        project_id: DbId,
        run_id: RunId,
        metadata: PauseMetadata,
    ) -> CoreResult<FlowRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .filter(|run| run.project_id == project_id)
            .ok_or_else(|| CoreError::not_found("FlowRun", run_id))?;
        if run.status != RunStatus::Paused {
            return Err(CoreError::Conflict(format!(
                "Run {run_id} is {}, not PAUSED",
                run.status
            )));
        }
        run.pause_metadata = Some(metadata);
        run.updated_at = Utc::now();
        Ok(run.clone())
    }
}
