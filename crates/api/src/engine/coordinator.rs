//! Run lifecycle coordinator.
//!
//! Accepts execution requests, enqueues their jobs and reconciles worker
//! progress reports into run records. A report touches up to five
//! collaborators (webhook correlator, run store, event bus, flow store, job
//! queue); each step is independent and the queue is always resolved last,
//! after the run record is written.

use std::sync::Arc;
use std::time::Duration;

use flowline_core::edition::{Edition, Environment};
use flowline_core::error::{CoreError, CoreResult};
use flowline_core::flow::{FlowStatus, FlowVersionRequest, PopulatedFlow};
use flowline_core::job_data::JobData;
use flowline_core::piece_lock::lock_piece_versions;
use flowline_core::queue::{EnqueueJob, JobQueue, JobStatus, JobUpdate, QueueName};
use flowline_core::quota::{Admission, QuotaGuard};
use flowline_core::run::{
    FlowRun, NewFlowRun, PauseDetails, PauseMetadata, ProgressUpdateType, RunDetails,
    RunOutcome, RunStatus, RunStatusUpdate, RunWrite,
};
use flowline_core::store::{FileStore, FileType, FlowStore, PieceRegistry, RunStore, TriggerHooks};
use flowline_core::triggers::ScheduleTriggerHooks;
use flowline_core::types::{DbId, JobId, RunId};
use flowline_core::webhook_response::EngineHttpResponse;
use flowline_events::{EventBus, PlatformEvent, WebhookResponseWatcher};

use crate::state::Backends;

/// Job message recorded for every non-failing resolution.
const JOB_SUCCEEDED_MESSAGE: &str = "Flow succeeded";

/// Deployment switches the coordinator honours.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorSettings {
    pub edition: Edition,
    pub environment: Environment,
    /// Disable a flow once its trigger failed this many times in a row.
    pub max_consecutive_trigger_failures: Option<i32>,
}

/// The claim an engine principal holds on the job backing a run.
#[derive(Debug, Clone)]
pub struct JobClaim {
    pub job_id: JobId,
    pub token: String,
}

/// Where a synchronous webhook caller waits for its reply.
#[derive(Debug, Clone)]
pub struct ReplyTarget {
    pub handler_id: String,
    pub request_id: String,
}

/// Input for [`RunCoordinator::start_run`].
#[derive(Debug, Clone)]
pub struct StartRun {
    pub flow: PopulatedFlow,
    pub trigger_payload: serde_json::Value,
    pub reply_to: Option<ReplyTarget>,
}

/// One worker progress report.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub run_id: RunId,
    /// The reporting principal's project; the run must belong to it.
    pub project_id: DbId,
    /// `None` when the reporter holds no claim; RUNNING reports never need one.
    pub claim: Option<JobClaim>,
    pub details: RunDetails,
    pub worker_handler_id: Option<String>,
    pub http_request_id: Option<String>,
    pub progress_update_type: ProgressUpdateType,
}

pub struct RunCoordinator {
    runs: Arc<dyn RunStore>,
    flows: Arc<dyn FlowStore>,
    queue: Arc<dyn JobQueue>,
    files: Arc<dyn FileStore>,
    pieces: Arc<dyn PieceRegistry>,
    triggers: Arc<dyn TriggerHooks>,
    quota: QuotaGuard,
    webhooks: Arc<WebhookResponseWatcher>,
    events: Arc<EventBus>,
    settings: CoordinatorSettings,
}

impl RunCoordinator {
    pub fn new(
        backends: &Backends,
        webhooks: Arc<WebhookResponseWatcher>,
        events: Arc<EventBus>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            runs: Arc::clone(&backends.runs),
            flows: Arc::clone(&backends.flows),
            queue: Arc::clone(&backends.queue),
            files: Arc::clone(&backends.files),
            pieces: Arc::clone(&backends.pieces),
            triggers: Arc::new(ScheduleTriggerHooks::new(Arc::clone(&backends.queue))),
            quota: QuotaGuard::new(settings.edition, Arc::clone(&backends.usage)),
            webhooks,
            events,
            settings,
        }
    }

    /// Replace the trigger deregistration path.
    pub fn with_trigger_hooks(mut self, triggers: Arc<dyn TriggerHooks>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn settings(&self) -> CoordinatorSettings {
        self.settings
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    pub async fn admit_run(&self, project_id: DbId) -> CoreResult<Admission> {
        self.quota.admit(project_id).await
    }

    /// Create a RUNNING run and enqueue the job that executes it.
    ///
    /// Nothing is written when the project is over quota.
    pub async fn start_run(&self, request: StartRun) -> CoreResult<FlowRun> {
        let StartRun {
            flow,
            trigger_payload,
            reply_to,
        } = request;
        let project_id = flow.flow.project_id;

        if let Admission::Reject { metric } = self.admit_run(project_id).await? {
            tracing::info!(project_id, flow_id = flow.flow.id, "Run rejected, quota exceeded");
            return Err(CoreError::QuotaExceeded { metric });
        }

        let run = self
            .runs
            .create(NewFlowRun {
                project_id,
                flow_id: flow.flow.id,
                flow_version_id: flow.version.id,
            })
            .await?;

        let (synchronous_handler_id, http_request_id, progress_update_type) = match reply_to {
            Some(target) => (
                Some(target.handler_id),
                Some(target.request_id),
                ProgressUpdateType::WebhookResponse,
            ),
            None => (None, None, ProgressUpdateType::None),
        };
        let data = JobData::ExecuteRun {
            run_id: run.id,
            project_id,
            flow_id: run.flow_id,
            flow_version_id: run.flow_version_id,
            trigger_payload,
            synchronous_handler_id,
            http_request_id,
            progress_update_type,
        };
        let job_id = self
            .queue
            .enqueue(EnqueueJob::new(QueueName::OneTime, data.to_payload()?))
            .await?;

        tracing::info!(
            run_id = %run.id,
            job_id = %job_id,
            project_id,
            flow_id = run.flow_id,
            "Flow run started",
        );
        self.events.publish(PlatformEvent::flow_run_progress(&run));
        Ok(run)
    }

    // -----------------------------------------------------------------------
    // Progress reports
    // -----------------------------------------------------------------------

    /// Reconcile a worker report into the run record.
    ///
    /// Order: reply to a waiting webhook caller, write the run, attach pause
    /// metadata, broadcast, auto-disable on quota, resolve the job. A RUNNING
    /// report never touches the queue.
    pub async fn report_progress(&self, report: ProgressReport) -> CoreResult<FlowRun> {
        let ProgressReport {
            run_id,
            project_id,
            claim,
            details,
            worker_handler_id,
            http_request_id,
            progress_update_type,
        } = report;
        let reported = details.status();

        // 1. Answer a synchronous caller before the write settles.
        if reported != RunStatus::Running
            && progress_update_type == ProgressUpdateType::WebhookResponse
        {
            if let (Some(handler_id), Some(request_id)) = (&worker_handler_id, &http_request_id) {
                let response = EngineHttpResponse::from_outcome(&details.outcome);
                if let Err(e) = self.webhooks.publish(request_id, handler_id, response).await {
                    tracing::warn!(
                        run_id = %run_id,
                        request_id = %request_id,
                        error = %e,
                        "Failed to publish webhook reply",
                    );
                }
            }
        }

        // 2-3. Persist the normalized status.
        let update = RunStatusUpdate::from_report(run_id, project_id, &details);
        let mut run = match self.runs.update_status(update).await? {
            RunWrite::Applied { run, previous } => {
                if !previous.is_terminal() && run.status.is_terminal() {
                    if let Err(e) = self.quota.record_usage(run.project_id, run.tasks).await {
                        tracing::error!(run_id = %run.id, error = %e, "Failed to record task usage");
                    }
                }
                run
            }
            RunWrite::Unchanged(run) => {
                tracing::debug!(run_id = %run.id, status = %run.status, "Duplicate terminal report");
                run
            }
            RunWrite::Rejected { current } => {
                tracing::error!(
                    run_id = %run_id,
                    current = %current,
                    reported = %reported,
                    "Report conflicts with the run's terminal status",
                );
                return Err(CoreError::Conflict(format!(
                    "Run {run_id} is already {current}, refusing {}",
                    reported.normalized()
                )));
            }
        };

        // 4. Keep a paused run resumable.
        if let RunOutcome::Paused { pause_metadata } = &details.outcome {
            let metadata = PauseMetadata {
                progress_update_type,
                handler_id: worker_handler_id.clone(),
                pause: pause_metadata.clone(),
            };
            match self.runs.pause(project_id, run_id, metadata).await {
                Ok(paused) => run = paused,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Failed to store pause metadata");
                }
            }
            if let PauseDetails::Delay {
                resume_date_time, ..
            } = pause_metadata
            {
                self.schedule_resume(&run, *resume_date_time).await;
            }
        }

        // 5. Fire and forget.
        self.events.publish(PlatformEvent::flow_run_progress(&run));

        // 6. Stop further automatic triggering.
        if reported == RunStatus::QuotaExceeded {
            tracing::info!(
                project_id = run.project_id,
                run_id = %run.id,
                "Disabling flow due to quota exceeded",
            );
            if let Err(e) = self
                .flows
                .update_status(run.project_id, run.flow_id, FlowStatus::Disabled)
                .await
            {
                tracing::error!(flow_id = run.flow_id, error = %e, "Failed to disable flow");
            }
        }

        // 7. Resolve the claim last.
        if reported != RunStatus::Running {
            match claim {
                Some(claim) => self.resolve_job(&run, &details, claim).await?,
                None => {
                    tracing::warn!(run_id = %run.id, "Terminal report without a job claim");
                }
            }
        }

        Ok(run)
    }

    async fn schedule_resume(&self, run: &FlowRun, resume_at: chrono::DateTime<chrono::Utc>) {
        let delay = (resume_at - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let data = JobData::ResumeRun {
            run_id: run.id,
            project_id: run.project_id,
            flow_id: run.flow_id,
            flow_version_id: run.flow_version_id,
        };
        let enqueued = match data.to_payload() {
            Ok(payload) => {
                self.queue
                    .enqueue(EnqueueJob::new(QueueName::OneTime, payload).with_delay(delay))
                    .await
            }
            Err(e) => Err(e),
        };
        match enqueued {
            Ok(job_id) => tracing::info!(
                run_id = %run.id,
                job_id = %job_id,
                delay_secs = delay.as_secs(),
                "Scheduled resume of paused run",
            ),
            Err(e) => tracing::error!(run_id = %run.id, error = %e, "Failed to schedule resume"),
        }
    }

    async fn resolve_job(
        &self,
        run: &FlowRun,
        details: &RunDetails,
        claim: JobClaim,
    ) -> CoreResult<()> {
        let (status, message) = match &details.outcome {
            RunOutcome::InternalError { error } => {
                let payload = error.clone().unwrap_or(serde_json::Value::Null);
                (
                    JobStatus::Failed,
                    format!("Internal error reported by engine: {payload}"),
                )
            }
            _ => (JobStatus::Completed, JOB_SUCCEEDED_MESSAGE.to_string()),
        };
        let outcome = self
            .queue
            .update(JobUpdate {
                job_id: claim.job_id,
                queue_name: QueueName::OneTime,
                status,
                token: claim.token,
                message,
            })
            .await?;
        tracing::debug!(
            run_id = %run.id,
            job_id = %claim.job_id,
            job_status = %status,
            ?outcome,
            "Job resolved",
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Worker-facing operations
    // -----------------------------------------------------------------------

    /// Fails with `QuotaExceeded` once the project reached its ceiling.
    pub async fn check_task_limit(&self, project_id: DbId) -> CoreResult<()> {
        self.quota.check_task_limit(project_id).await
    }

    /// Apply a queue-level report from a worker.
    ///
    /// Acknowledged without side effects in a testing environment.
    pub async fn update_job(&self, update: JobUpdate) -> CoreResult<()> {
        if self.settings.environment == Environment::Testing {
            tracing::debug!(job_id = %update.job_id, "Skipping job update in testing environment");
            return Ok(());
        }
        let job_id = update.job_id;
        let status = update.status;
        let outcome = self.queue.update(update).await?;
        tracing::info!(job_id = %job_id, status = %status, ?outcome, "Job updated by worker");
        Ok(())
    }

    /// Purge work for a flow that may no longer run.
    ///
    /// Without a (visible) flow the repeating schedule is removed from the
    /// queue directly; otherwise the trigger is disabled through its own
    /// deregistration path, ignoring failures.
    pub async fn remove_stale_job(
        &self,
        project_id: DbId,
        flow_id: Option<DbId>,
        flow_version_id: DbId,
    ) -> CoreResult<()> {
        let flow = match flow_id {
            Some(flow_id) => self.flows.get_flow(project_id, flow_id).await?,
            None => None,
        };
        let version = match &flow {
            Some(flow) => self
                .flows
                .get_version(flow_version_id)
                .await?
                .filter(|v| v.flow_id == flow.id),
            None => None,
        };

        let Some(version) = version else {
            let removed = self.queue.remove_repeating_job(flow_version_id).await?;
            tracing::info!(flow_version_id, removed, "Removed stale repeating job");
            return Ok(());
        };

        if let Err(e) = self.triggers.disable(project_id, &version).await {
            tracing::warn!(
                flow_version_id,
                error = %e,
                "Ignoring trigger disable failure for stale job",
            );
        }
        Ok(())
    }

    /// Track consecutive trigger failures, disabling the flow at the limit.
    pub async fn record_trigger_outcome(
        &self,
        project_id: DbId,
        flow_id: DbId,
        success: bool,
    ) -> CoreResult<i32> {
        let failures = self
            .flows
            .record_trigger_outcome(project_id, flow_id, success)
            .await?;
        let limit_reached = self
            .settings
            .max_consecutive_trigger_failures
            .is_some_and(|max| !success && failures >= max);
        if limit_reached {
            tracing::info!(project_id, flow_id, failures, "Disabling flow after repeated trigger failures");
            self.flows
                .update_status(project_id, flow_id, FlowStatus::Disabled)
                .await?;
        }
        Ok(failures)
    }

    pub async fn get_run(&self, project_id: DbId, run_id: RunId) -> CoreResult<FlowRun> {
        self.runs
            .get(project_id, run_id)
            .await?
            .ok_or_else(|| CoreError::not_found("FlowRun", run_id))
    }

    pub async fn list_flows(&self, project_id: DbId) -> CoreResult<Vec<PopulatedFlow>> {
        self.flows.list_populated(project_id).await
    }

    /// The requested version of a project's flow with every piece pinned.
    pub async fn get_flow_for_worker(
        &self,
        project_id: DbId,
        request: FlowVersionRequest,
    ) -> CoreResult<PopulatedFlow> {
        let (flow, version) = match request {
            FlowVersionRequest::Latest { flow_id } => {
                let flow = self.project_flow(project_id, flow_id).await?;
                let version = self
                    .flows
                    .latest_version(flow_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("FlowVersion", format!("latest of {flow_id}")))?;
                (flow, version)
            }
            FlowVersionRequest::Exact { version_id } => {
                let version = self
                    .flows
                    .get_version(version_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("FlowVersion", version_id))?;
                let flow = self
                    .flows
                    .get_flow(project_id, version.flow_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("FlowVersion", version_id))?;
                (flow, version)
            }
            FlowVersionRequest::Locked { flow_id } => {
                let flow = self.project_flow(project_id, flow_id).await?;
                let version_id = flow.published_version_id.ok_or_else(|| {
                    CoreError::not_found("FlowVersion", format!("published of {flow_id}"))
                })?;
                let version = self
                    .flows
                    .get_version(version_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("FlowVersion", version_id))?;
                (flow, version)
            }
        };

        let version = lock_piece_versions(version, self.pieces.as_ref()).await?;
        Ok(PopulatedFlow { flow, version })
    }

    async fn project_flow(
        &self,
        project_id: DbId,
        flow_id: DbId,
    ) -> CoreResult<flowline_core::flow::Flow> {
        self.flows
            .get_flow(project_id, flow_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))
    }

    /// Archives of other projects are reported as not found.
    pub async fn get_package_archive(&self, project_id: DbId, file_id: DbId) -> CoreResult<Vec<u8>> {
        self.files
            .get_data(project_id, file_id, FileType::PackageArchive)
            .await?
            .ok_or_else(|| CoreError::not_found("File", file_id))
    }

    // -----------------------------------------------------------------------
    // Webhook ingress
    // -----------------------------------------------------------------------

    /// The published version of an enabled flow, for public webhook calls.
    ///
    /// Disabled and unpublished flows are reported as not found.
    pub async fn webhook_flow(&self, flow_id: DbId) -> CoreResult<PopulatedFlow> {
        let flow = self
            .flows
            .find_flow(flow_id)
            .await?
            .filter(|flow| flow.status == FlowStatus::Enabled)
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))?;
        let version_id = flow
            .published_version_id
            .ok_or_else(|| CoreError::not_found("Flow", flow_id))?;
        let version = self
            .flows
            .get_version(version_id)
            .await?
            .ok_or_else(|| CoreError::not_found("FlowVersion", version_id))?;
        Ok(PopulatedFlow { flow, version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use flowline_core::memory::{
        InMemoryFileStore, InMemoryFlowStore, InMemoryJobQueue, InMemoryPieceRegistry,
        InMemoryRunStore, InMemoryUsageStore,
    };
    use flowline_core::queue::ClaimedJob;
    use flowline_core::store::UsageStore;
    use flowline_events::InMemoryBroker;
    use tokio::sync::Mutex;

    /// Records every disable call instead of touching the queue.
    #[derive(Default)]
    struct RecordingHooks {
        disabled: Mutex<Vec<DbId>>,
    }

    #[async_trait::async_trait]
    impl TriggerHooks for RecordingHooks {
        async fn disable(
            &self,
            _project_id: DbId,
            version: &flowline_core::flow::FlowVersion,
        ) -> CoreResult<()> {
            self.disabled.lock().await.push(version.id);
            Err(CoreError::Internal("trigger backend offline".into()))
        }
    }

    struct Harness {
        coordinator: RunCoordinator,
        flows: Arc<InMemoryFlowStore>,
        queue: Arc<InMemoryJobQueue>,
        usage: Arc<InMemoryUsageStore>,
        hooks: Arc<RecordingHooks>,
        events: Arc<EventBus>,
    }

    /// Delegates to an in-memory store but cannot persist pause metadata.
    struct PauseRejectingRuns {
        inner: InMemoryRunStore,
    }

    #[async_trait::async_trait]
    impl RunStore for PauseRejectingRuns {
        async fn create(&self, run: NewFlowRun) -> CoreResult<FlowRun> {
            self.inner.create(run).await
        }

        async fn get(&self, project_id: DbId, run_id: RunId) -> CoreResult<Option<FlowRun>> {
            self.inner.get(project_id, run_id).await
        }

        async fn update_status(&self, update: RunStatusUpdate) -> CoreResult<RunWrite> {
            self.inner.update_status(update).await
        }

        async fn pause(
            &self,
            _project_id: DbId,
            _run_id: RunId,
            _metadata: PauseMetadata,
        ) -> CoreResult<FlowRun> {
            Err(CoreError::Internal("run store offline".into()))
        }
    }

    fn harness(edition: Edition) -> Harness {
        harness_with_runs(edition, Arc::new(InMemoryRunStore::new()))
    }

    fn harness_with_runs(edition: Edition, runs: Arc<dyn RunStore>) -> Harness {
        let flows = Arc::new(InMemoryFlowStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let usage = Arc::new(InMemoryUsageStore::new());
        let backends = Backends {
            runs,
            flows: flows.clone(),
            queue: queue.clone(),
            usage: usage.clone(),
            files: Arc::new(InMemoryFileStore::new()),
            pieces: Arc::new(InMemoryPieceRegistry::new()),
        };
        let watcher = Arc::new(WebhookResponseWatcher::new(
            "handler-test",
            Arc::new(InMemoryBroker::new()),
            Duration::from_millis(200),
        ));
        let events = Arc::new(EventBus::default());
        let hooks = Arc::new(RecordingHooks::default());
        let settings = CoordinatorSettings {
            edition,
            max_consecutive_trigger_failures: Some(3),
            ..Default::default()
        };
        let coordinator = RunCoordinator::new(&backends, watcher, Arc::clone(&events), settings)
            .with_trigger_hooks(hooks.clone());
        Harness {
            coordinator,
            flows,
            queue,
            usage,
            hooks,
            events,
        }
    }

    fn details(json: serde_json::Value) -> RunDetails {
        serde_json::from_value(json).expect("valid run details")
    }

    /// Start a run and claim its job as a worker would.
    async fn started(h: &Harness) -> (FlowRun, ClaimedJob) {
        let flow = h
            .flows
            .create_flow(1, "Notify", serde_json::json!({ "name": "trigger" }))
            .await;
        let run = h
            .coordinator
            .start_run(StartRun {
                flow,
                trigger_payload: serde_json::json!({ "body": {} }),
                reply_to: None,
            })
            .await
            .unwrap();
        let claimed = h
            .queue
            .claim(QueueName::OneTime, "worker-1")
            .await
            .unwrap()
            .expect("job enqueued");
        (run, claimed)
    }

    fn report(run: &FlowRun, claimed: &ClaimedJob, details: RunDetails) -> ProgressReport {
        ProgressReport {
            run_id: run.id,
            project_id: run.project_id,
            claim: Some(JobClaim {
                job_id: claimed.job.id,
                token: claimed.token.clone(),
            }),
            details,
            worker_handler_id: None,
            http_request_id: None,
            progress_update_type: ProgressUpdateType::None,
        }
    }

    #[tokio::test]
    async fn success_persists_counters_and_completes_job() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;

        let done = h
            .coordinator
            .report_progress(report(
                &run,
                &claimed,
                details(serde_json::json!({
                    "status": "SUCCEEDED",
                    "tasks": 5,
                    "duration": 1200,
                    "steps": { "trigger": { "type": "TRIGGER", "status": "SUCCEEDED", "input": {} } }
                })),
            ))
            .await
            .unwrap();

        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.tasks, 5);
        assert_eq!(done.duration, 1200);
        assert!(done.execution_state.is_some());

        let job = h.queue.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.message.as_deref(), Some(JOB_SUCCEEDED_MESSAGE));
    }

    #[tokio::test]
    async fn running_report_leaves_job_running() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;

        h.coordinator
            .report_progress(report(&run, &claimed, details(serde_json::json!({ "status": "RUNNING" }))))
            .await
            .unwrap();

        let job = h.queue.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn internal_error_fails_job_with_payload() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;

        let done = h
            .coordinator
            .report_progress(report(
                &run,
                &claimed,
                details(serde_json::json!({
                    "status": "INTERNAL_ERROR",
                    "error": { "message": "sandbox crashed" },
                    "steps": { "trigger": { "type": "TRIGGER", "status": "SUCCEEDED", "input": {} } }
                })),
            ))
            .await
            .unwrap();
        assert!(done.execution_state.is_none());

        let job = h.queue.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let message = job.message.unwrap();
        assert!(message.starts_with("Internal error reported by engine:"));
        assert!(message.contains("sandbox crashed"));
    }

    #[tokio::test]
    async fn quota_exceeded_disables_flow() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;

        h.coordinator
            .report_progress(report(&run, &claimed, details(serde_json::json!({ "status": "QUOTA_EXCEEDED" }))))
            .await
            .unwrap();

        let flow = h.flows.get_flow(1, run.flow_id).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::Disabled);
    }

    #[tokio::test]
    async fn conflicting_terminal_report_is_rejected() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;
        let succeeded = details(serde_json::json!({ "status": "SUCCEEDED" }));
        h.coordinator
            .report_progress(report(&run, &claimed, succeeded))
            .await
            .unwrap();

        let failed = details(serde_json::json!({ "status": "FAILED" }));
        let outcome = h.coordinator.report_progress(report(&run, &claimed, failed)).await;
        assert_matches!(outcome, Err(CoreError::Conflict(_)));

        let stored = h.coordinator.get_run(1, run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn duplicate_terminal_report_counts_usage_once() {
        let h = harness(Edition::Cloud);
        let (run, claimed) = started(&h).await;
        let succeeded = details(serde_json::json!({ "status": "SUCCEEDED", "tasks": 4 }));

        h.coordinator
            .report_progress(report(&run, &claimed, succeeded.clone()))
            .await
            .unwrap();
        h.coordinator
            .report_progress(report(&run, &claimed, succeeded))
            .await
            .unwrap();

        let period = flowline_core::quota::billing_period_start(chrono::Utc::now());
        assert_eq!(h.usage.tasks_used(1, period).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn stale_token_writes_run_but_not_job() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;
        let mut stale = report(&run, &claimed, details(serde_json::json!({ "status": "SUCCEEDED" })));
        stale.claim = Some(JobClaim {
            job_id: claimed.job.id,
            token: "not-the-token".into(),
        });

        let outcome = h.coordinator.report_progress(stale).await;
        assert_matches!(outcome, Err(CoreError::StaleClaim(_)));

        let stored = h.coordinator.get_run(1, run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        let job = h.queue.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn delay_pause_schedules_one_resume_job() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;
        let resume_at = chrono::Utc::now() + chrono::Duration::minutes(10);

        let paused = h
            .coordinator
            .report_progress(report(
                &run,
                &claimed,
                details(serde_json::json!({
                    "status": "PAUSED",
                    "pauseMetadata": { "type": "DELAY", "resumeDateTime": resume_at }
                })),
            ))
            .await
            .unwrap();
        assert_eq!(paused.status, RunStatus::Paused);
        assert!(paused.pause_metadata.is_some());

        let resumes: Vec<_> = h
            .queue
            .snapshot()
            .await
            .into_iter()
            .filter(|job| job.payload["kind"] == "RESUME_RUN")
            .collect();
        assert_eq!(resumes.len(), 1);
        assert_eq!(resumes[0].status, JobStatus::Queued);
        assert!(resumes[0].run_at > chrono::Utc::now());
    }

    #[tokio::test]
    async fn failed_pause_write_still_broadcasts_and_resolves_job() {
        let runs = Arc::new(PauseRejectingRuns {
            inner: InMemoryRunStore::new(),
        });
        let h = harness_with_runs(Edition::Community, runs);
        let (run, claimed) = started(&h).await;
        let mut events = h.events.subscribe();
        let resume_at = chrono::Utc::now() + chrono::Duration::minutes(5);

        let paused = h
            .coordinator
            .report_progress(report(
                &run,
                &claimed,
                details(serde_json::json!({
                    "status": "PAUSED",
                    "pauseMetadata": { "type": "DELAY", "resumeDateTime": resume_at }
                })),
            ))
            .await
            .unwrap();
        assert_eq!(paused.status, RunStatus::Paused);

        let event = events.recv().await.unwrap();
        assert_eq!(event.payload["status"], "PAUSED");

        let job = h.queue.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn progress_is_broadcast() {
        let h = harness(Edition::Community);
        let (run, claimed) = started(&h).await;
        let mut events = h.events.subscribe();

        h.coordinator
            .report_progress(report(&run, &claimed, details(serde_json::json!({ "status": "FAILED" }))))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.project_id, Some(1));
        assert_eq!(event.payload["status"], "FAILED");
    }

    #[tokio::test]
    async fn admission_depends_on_edition() {
        let community = harness(Edition::Community);
        community.usage.set_plan_limit(1, 10).await;
        community.coordinator.quota.record_usage(1, 50).await.unwrap();
        assert_eq!(community.coordinator.admit_run(1).await.unwrap(), Admission::Allow);

        let cloud = harness(Edition::Cloud);
        cloud.usage.set_plan_limit(1, 10).await;
        cloud.coordinator.quota.record_usage(1, 10).await.unwrap();
        assert_matches!(
            cloud.coordinator.admit_run(1).await.unwrap(),
            Admission::Reject { metric: "tasks" }
        );
    }

    #[tokio::test]
    async fn over_quota_start_writes_nothing() {
        let h = harness(Edition::Cloud);
        h.usage.set_plan_limit(1, 1).await;
        h.coordinator.quota.record_usage(1, 1).await.unwrap();
        let flow = h.flows.create_flow(1, "Notify", serde_json::json!({})).await;

        let outcome = h
            .coordinator
            .start_run(StartRun {
                flow,
                trigger_payload: serde_json::Value::Null,
                reply_to: None,
            })
            .await;
        assert_matches!(outcome, Err(CoreError::QuotaExceeded { .. }));
        assert!(h.queue.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn stale_job_without_flow_purges_schedule() {
        let h = harness(Edition::Community);
        h.queue
            .enqueue(
                EnqueueJob::new(QueueName::Repeating, serde_json::json!({})).for_flow_version(42),
            )
            .await
            .unwrap();

        h.coordinator.remove_stale_job(1, None, 42).await.unwrap();

        assert!(h.queue.snapshot().await.is_empty());
        assert!(h.hooks.disabled.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stale_job_with_flow_disables_trigger_only() {
        let h = harness(Edition::Community);
        let flow = h.flows.create_flow(1, "Cron", serde_json::json!({})).await;
        h.queue
            .enqueue(
                EnqueueJob::new(QueueName::Repeating, serde_json::json!({}))
                    .for_flow_version(flow.version.id),
            )
            .await
            .unwrap();

        // The recording hook fails; the failure is ignored.
        h.coordinator
            .remove_stale_job(1, Some(flow.flow.id), flow.version.id)
            .await
            .unwrap();

        assert_eq!(*h.hooks.disabled.lock().await, vec![flow.version.id]);
        assert_eq!(h.queue.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn repeated_trigger_failures_disable_flow() {
        let h = harness(Edition::Community);
        let flow = h.flows.create_flow(1, "Poll", serde_json::json!({})).await;

        for _ in 0..2 {
            h.coordinator
                .record_trigger_outcome(1, flow.flow.id, false)
                .await
                .unwrap();
        }
        let current = h.flows.get_flow(1, flow.flow.id).await.unwrap().unwrap();
        assert_eq!(current.status, FlowStatus::Enabled);

        let failures = h
            .coordinator
            .record_trigger_outcome(1, flow.flow.id, false)
            .await
            .unwrap();
        assert_eq!(failures, 3);
        let current = h.flows.get_flow(1, flow.flow.id).await.unwrap().unwrap();
        assert_eq!(current.status, FlowStatus::Disabled);
    }
}
