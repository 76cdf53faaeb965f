//! Per-project task quota gating.
//!
//! Usage is counted per calendar month (UTC). Ceilings come from the
//! project's plan and are only enforced on tiers that sell plans.

use std::sync::Arc;

use chrono::Datelike;

use crate::edition::Edition;
use crate::error::{CoreError, CoreResult};
use crate::store::UsageStore;
use crate::types::{DbId, Timestamp};

/// Metric name carried by task quota rejections.
pub const METRIC_TASKS: &str = "tasks";

/// Whether a new execution may be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Reject { metric: &'static str },
}

/// Start of the billing period containing `now`.
pub fn billing_period_start(now: Timestamp) -> Timestamp {
    now.date_naive()
        .with_day(1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|start| start.and_utc())
        .unwrap_or(now)
}

pub struct QuotaGuard {
    edition: Edition,
    usage: Arc<dyn UsageStore>,
}

impl QuotaGuard {
    pub fn new(edition: Edition, usage: Arc<dyn UsageStore>) -> Self {
        Self { edition, usage }
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    /// True when the project's usage this period meets or exceeds its ceiling.
    ///
    /// Always false on the community tier and for projects without a ceiling.
    pub async fn exceeded_limit(&self, project_id: DbId) -> CoreResult<bool> {
        if !self.edition.supports_plans() {
            return Ok(false);
        }
        let Some(limit) = self.usage.plan_task_limit(project_id).await? else {
            return Ok(false);
        };
        let period = billing_period_start(chrono::Utc::now());
        let used = self.usage.tasks_used(project_id, period).await?;
        Ok(used >= limit)
    }

    pub async fn admit(&self, project_id: DbId) -> CoreResult<Admission> {
        if self.exceeded_limit(project_id).await? {
            Ok(Admission::Reject {
                metric: METRIC_TASKS,
            })
        } else {
            Ok(Admission::Allow)
        }
    }

    /// Fails with [`CoreError::QuotaExceeded`] once the ceiling is reached.
    pub async fn check_task_limit(&self, project_id: DbId) -> CoreResult<()> {
        match self.admit(project_id).await? {
            Admission::Allow => Ok(()),
            Admission::Reject { metric } => Err(CoreError::QuotaExceeded { metric }),
        }
    }

    /// Add the tasks of a finished run to the current period.
    pub async fn record_usage(&self, project_id: DbId, tasks: i64) -> CoreResult<()> {
        if tasks <= 0 {
            return Ok(());
        }
        let period = billing_period_start(chrono::Utc::now());
        self.usage.add_tasks(project_id, period, tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryUsageStore;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    async fn guard_with(edition: Edition, limit: Option<i64>, used: i64) -> QuotaGuard {
        let usage = Arc::new(InMemoryUsageStore::new());
        if let Some(limit) = limit {
            usage.set_plan_limit(1, limit).await;
        }
        let guard = QuotaGuard::new(edition, usage);
        guard.record_usage(1, used).await.unwrap();
        guard
    }

    #[test]
    fn period_starts_on_first_of_month() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 17, 13, 45, 2).unwrap();
        assert_eq!(
            billing_period_start(now),
            chrono::Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn community_always_admits() {
        let guard = guard_with(Edition::Community, Some(10), 500).await;
        assert_eq!(guard.admit(1).await.unwrap(), Admission::Allow);
        assert!(guard.check_task_limit(1).await.is_ok());
    }

    #[tokio::test]
    async fn reaching_the_ceiling_rejects() {
        let guard = guard_with(Edition::Cloud, Some(10), 10).await;
        assert_eq!(
            guard.admit(1).await.unwrap(),
            Admission::Reject {
                metric: METRIC_TASKS
            }
        );
        assert_matches!(
            guard.check_task_limit(1).await,
            Err(CoreError::QuotaExceeded { metric: "tasks" })
        );
    }

    #[tokio::test]
    async fn below_ceiling_or_unlimited_admits() {
        let guard = guard_with(Edition::Enterprise, Some(10), 9).await;
        assert_eq!(guard.admit(1).await.unwrap(), Admission::Allow);

        let guard = guard_with(Edition::Cloud, None, 1_000).await;
        assert_eq!(guard.admit(1).await.unwrap(), Admission::Allow);
    }
}
