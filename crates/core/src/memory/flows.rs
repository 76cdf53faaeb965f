use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::flow::{Flow, FlowStatus, FlowVersion, FlowVersionState, PopulatedFlow};
use crate::store::FlowStore;
use crate::types::DbId;

#[derive(Default)]
struct Tables {
    next_id: DbId,
    flows: BTreeMap<DbId, Flow>,
    versions: BTreeMap<DbId, FlowVersion>,
}

impl Tables {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

/// Flows and versions keyed by id; ids are allocated from one sequence.
#[derive(Default)]
pub struct InMemoryFlowStore {
    tables: RwLock<Tables>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an ENABLED flow whose first version is also its published one.
    pub async fn create_flow(
        &self,
        project_id: DbId,
        display_name: &str,
        trigger: serde_json::Value,
    ) -> PopulatedFlow {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let flow_id = tables.next_id();
        let version_id = tables.next_id();
        let version = FlowVersion {
            id: version_id,
            flow_id,
            display_name: display_name.to_string(),
            trigger,
            state: FlowVersionState::Locked,
            created_at: now,
            updated_at: now,
        };
        let flow = Flow {
            id: flow_id,
            project_id,
            status: FlowStatus::Enabled,
            published_version_id: Some(version_id),
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        };
        tables.versions.insert(version_id, version.clone());
        tables.flows.insert(flow_id, flow.clone());
        PopulatedFlow { flow, version }
    }

    /// Add a DRAFT version without publishing it.
    pub async fn add_version(
        &self,
        flow_id: DbId,
        trigger: serde_json::Value,
    ) -> CoreResult<FlowVersion> {
        let mut tables = self.tables.write().await;
        if !tables.flows.contains_key(&flow_id) {
            return Err(CoreError::not_found("Flow", flow_id));
        }
        let now = Utc::now();
        let version = FlowVersion {
            id: tables.next_id(),
            flow_id,
            display_name: format!("Draft of flow {flow_id}"),
            trigger,
            state: FlowVersionState::Draft,
            created_at: now,
            updated_at: now,
        };
        tables.versions.insert(version.id, version.clone());
        Ok(version)
    }

    pub async fn set_published(&self, flow_id: DbId, version_id: Option<DbId>) -> CoreResult<()> {
        let mut tables = self.tables.write().await;
        let flow = tables
            .flows
            .get_mut(&flow_id)
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))?;
        flow.published_version_id = version_id;
        Ok(())
    }

    fn latest_of(tables: &Tables, flow_id: DbId) -> Option<FlowVersion> {
        tables
            .versions
            .values()
            .filter(|v| v.flow_id == flow_id)
            .max_by_key(|v| (v.created_at, v.id))
            .cloned()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn get_flow(&self, project_id: DbId, flow_id: DbId) -> CoreResult<Option<Flow>> {
        Ok(self
            .tables
            .read()
            .await
            .flows
            .get(&flow_id)
            .filter(|flow| flow.project_id == project_id)
            .cloned())
    }

    async fn find_flow(&self, flow_id: DbId) -> CoreResult<Option<Flow>> {
        Ok(self.tables.read().await.flows.get(&flow_id).cloned())
    }

    async fn get_version(&self, version_id: DbId) -> CoreResult<Option<FlowVersion>> {
        Ok(self.tables.read().await.versions.get(&version_id).cloned())
    }

    async fn latest_version(&self, flow_id: DbId) -> CoreResult<Option<FlowVersion>> {
        Ok(Self::latest_of(&*self.tables.read().await, flow_id))
    }

    async fn list_populated(&self, project_id: DbId) -> CoreResult<Vec<PopulatedFlow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .flows
            .values()
            .filter(|flow| flow.project_id == project_id)
            .filter_map(|flow| {
                Self::latest_of(&tables, flow.id).map(|version| PopulatedFlow {
                    flow: flow.clone(),
                    version,
                })
            })
            .collect())
    }

    async fn update_status(
        &self,
        project_id: DbId,
        flow_id: DbId,
        status: FlowStatus,
    ) -> CoreResult<Flow> {
        let mut tables = self.tables.write().await;
        let flow = tables
            .flows
            .get_mut(&flow_id)
            .filter(|flow| flow.project_id == project_id)
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))?;
        flow.status = status;
        flow.updated_at = Utc::now();
        Ok(flow.clone())
    }

    async fn record_trigger_outcome(
        &self,
        project_id: DbId,
        flow_id: DbId,
        success: bool,
    ) -> CoreResult<i32> {
        let mut tables = self.tables.write().await;
        let flow = tables
            .flows
            .get_mut(&flow_id)
            .filter(|flow| flow.project_id == project_id)
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))?;
        flow.consecutive_failures = if success {
            0
        } else {
            flow.consecutive_failures + 1
        };
        flow.updated_at = Utc::now();
        Ok(flow.consecutive_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_version_is_the_newest() {
        let store = InMemoryFlowStore::new();
        let populated = store.create_flow(1, "Flow", serde_json::json!({})).await;
        let draft = store
            .add_version(populated.flow.id, serde_json::json!({ "name": "trigger" }))
            .await
            .unwrap();

        let latest = store.latest_version(populated.flow.id).await.unwrap().unwrap();
        assert_eq!(latest.id, draft.id);

        let listed = store.list_populated(1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version.id, draft.id);
        assert!(store.list_populated(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_counter_resets_on_success() {
        let store = InMemoryFlowStore::new();
        let flow = store.create_flow(1, "Flow", serde_json::json!({})).await.flow;

        assert_eq!(store.record_trigger_outcome(1, flow.id, false).await.unwrap(), 1);
        assert_eq!(store.record_trigger_outcome(1, flow.id, false).await.unwrap(), 2);
        assert_eq!(store.record_trigger_outcome(1, flow.id, true).await.unwrap(), 0);
        assert!(store.record_trigger_outcome(2, flow.id, true).await.is_err());
    }
}
