use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreResult;
use crate::store::UsageStore;
use crate::types::{DbId, Timestamp};

#[derive(Default)]
pub struct InMemoryUsageStore {
    used: RwLock<HashMap<(DbId, Timestamp), i64>>,
    limits: RwLock<HashMap<DbId, i64>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_plan_limit(&self, project_id: DbId, tasks: i64) {
        self.limits.write().await.insert(project_id, tasks);
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn tasks_used(&self, project_id: DbId, period_start: Timestamp) -> CoreResult<i64> {
        Ok(self
            .used
            .read()
            .await
            .get(&(project_id, period_start))
            .copied()
            .unwrap_or(0))
    }

    async fn add_tasks(
        &self,
        project_id: DbId,
        period_start: Timestamp,
        tasks: i64,
    ) -> CoreResult<()> {
        *self
            .used
            .write()
            .await
            .entry((project_id, period_start))
            .or_insert(0) += tasks;
        Ok(())
    }

    async fn plan_task_limit(&self, project_id: DbId) -> CoreResult<Option<i64>> {
        Ok(self.limits.read().await.get(&project_id).copied())
    }
}
