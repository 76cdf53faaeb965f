//! Trigger deregistration backed by the job queue.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::flow::FlowVersion;
use crate::queue::JobQueue;
use crate::store::TriggerHooks;
use crate::types::DbId;

/// Disables a flow version's trigger by purging its scheduled instances.
pub struct ScheduleTriggerHooks {
    queue: Arc<dyn JobQueue>,
}

impl ScheduleTriggerHooks {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl TriggerHooks for ScheduleTriggerHooks {
    async fn disable(&self, _project_id: DbId, version: &FlowVersion) -> CoreResult<()> {
        self.queue.remove_repeating_job(version.id).await?;
        Ok(())
    }
}
