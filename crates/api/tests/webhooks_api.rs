//! Integration tests for public webhook ingress, asynchronous and synchronous.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, post_json, post_json_auth, test_config, TestApp, PROJECT_ID};
use flowline_core::edition::Edition;
use flowline_core::job_data::JobData;
use flowline_core::queue::JobStatus;
use serde_json::json;

// ---------------------------------------------------------------------------
// POST /webhooks/{flow_id}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn async_webhook_enqueues_run() {
    let app = TestApp::new();
    let flow = app.create_flow(PROJECT_ID).await;

    let response = post_json(
        &app.router,
        &format!("/api/v1/webhooks/{}?source=crm", flow.flow.id),
        json!({ "order": 17 }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({}));

    let jobs = app.queue.snapshot().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Queued);
    match JobData::from_payload(&jobs[0].payload).unwrap() {
        JobData::ExecuteRun {
            trigger_payload,
            synchronous_handler_id,
            ..
        } => {
            assert_eq!(trigger_payload["body"]["order"], 17);
            assert_eq!(trigger_payload["queryParams"]["source"], "crm");
            assert_eq!(trigger_payload["headers"]["content-type"], "application/json");
            assert!(synchronous_handler_id.is_none());
        }
        other => panic!("unexpected job data: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_flow_is_not_found() {
    let app = TestApp::new();
    let response = post_json(&app.router, "/api/v1/webhooks/12345", json!({})).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unpublished_flow_is_not_found() {
    let app = TestApp::new();
    let flow = app.create_flow(PROJECT_ID).await;
    app.flows.set_published(flow.flow.id, None).await.unwrap();

    let response = post_json(
        &app.router,
        &format!("/api/v1/webhooks/{}", flow.flow.id),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(app.queue.snapshot().await.is_empty());
}

#[tokio::test]
async fn over_quota_webhook_writes_nothing() {
    let mut config = test_config();
    config.edition = Edition::Cloud;
    let app = TestApp::with_config(config);
    app.usage.set_plan_limit(PROJECT_ID, 0).await;
    let flow = app.create_flow(PROJECT_ID).await;

    let response = post_json(
        &app.router,
        &format!("/api/v1/webhooks/{}/sync", flow.flow.id),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(app.queue.snapshot().await.is_empty());
    assert_eq!(app.state.webhook_watcher.pending_count().await, 0);
}

// ---------------------------------------------------------------------------
// POST /webhooks/{flow_id}/sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_webhook_times_out_with_504() {
    let app = TestApp::new();
    let flow = app.create_flow(PROJECT_ID).await;

    let response = post_json(
        &app.router,
        &format!("/api/v1/webhooks/{}/sync", flow.flow.id),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(app.state.webhook_watcher.pending_count().await, 0);
}

#[tokio::test]
async fn sync_webhook_answers_with_paused_response() {
    let mut config = test_config();
    config.webhook_timeout_secs = 10;
    config.poll_timeout_secs = 5;
    let app = TestApp::with_config(config);
    let flow = app.create_flow(PROJECT_ID).await;

    // A worker that claims the job and pauses the run with a reply.
    let router = app.router.clone();
    let worker_token = app.worker_token();
    let worker = tokio::spawn(async move {
        let polled = post_json_auth(&router, "/api/v1/workers/poll", json!({}), &worker_token).await;
        assert_eq!(polled.status(), StatusCode::OK);
        let job = body_json(polled).await["data"].clone();
        let payload = &job["payload"];
        assert_eq!(payload["progressUpdateType"], "WEBHOOK_RESPONSE");

        let report = post_json_auth(
            &router,
            "/api/v1/engine/update-run",
            json!({
                "runId": payload["runId"],
                "workerHandlerId": payload["synchronousHandlerId"],
                "httpRequestId": payload["httpRequestId"],
                "progressUpdateType": "WEBHOOK_RESPONSE",
                "runDetails": {
                    "status": "PAUSED",
                    "pauseMetadata": {
                        "type": "WEBHOOK",
                        "requestId": "resume-1",
                        "response": {
                            "status": 200,
                            "body": { "ok": true },
                            "headers": { "x-flow": "1" }
                        }
                    }
                }
            }),
            job["engineToken"].as_str().unwrap(),
        )
        .await;
        assert_eq!(report.status(), StatusCode::OK);
        body_json(report).await
    });

    let response = tokio::time::timeout(
        Duration::from_secs(15),
        post_json(
            &app.router,
            &format!("/api/v1/webhooks/{}/sync", flow.flow.id),
            json!({ "order": 17 }),
        ),
    )
    .await
    .expect("sync webhook should answer");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-flow"], "1");
    assert_eq!(body_json(response).await, json!({ "ok": true }));

    let run = worker.await.expect("worker task should finish");
    assert_eq!(run["data"]["status"], "PAUSED");
    assert_eq!(run["data"]["pauseMetadata"]["pause"]["type"], "WEBHOOK");
    assert_eq!(app.state.webhook_watcher.pending_count().await, 0);
}
