#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use flowline_api::auth::jwt::{
    generate_engine_token, generate_worker_token, Claims, JwtConfig, PrincipalType,
};
use flowline_api::config::ServerConfig;
use flowline_api::engine::{CoordinatorSettings, RunCoordinator, StartRun};
use flowline_api::router::build_app_router;
use flowline_api::state::{AppState, Backends};
use flowline_api::ws::WsManager;
use flowline_core::edition::{Edition, Environment};
use flowline_core::flow::PopulatedFlow;
use flowline_core::memory::{
    InMemoryFileStore, InMemoryFlowStore, InMemoryJobQueue, InMemoryPieceRegistry,
    InMemoryRunStore, InMemoryUsageStore,
};
use flowline_core::queue::{JobQueue, QueueName};
use flowline_core::run::FlowRun;
use flowline_core::types::{DbId, JobId};
use flowline_events::{EventBus, InMemoryBroker, WebhookResponseWatcher};
use http_body_util::BodyExt;
use tower::ServiceExt;

pub const PROJECT_ID: DbId = 1;
pub const OTHER_PROJECT_ID: DbId = 2;
pub const WORKER_ID: &str = "worker-1";

/// Build a test `ServerConfig` with safe defaults.
///
/// Worker polls return immediately and synchronous webhooks give up after
/// one second.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            engine_token_expiry_mins: 60,
        },
        edition: Edition::Community,
        environment: Environment::Production,
        database_url: None,
        webhook_timeout_secs: 1,
        claim_timeout_secs: 600,
        sweep_interval_secs: 15,
        poll_timeout_secs: 0,
        max_consecutive_trigger_failures: Some(3),
    }
}

/// A fully wired application on in-memory backends.
///
/// The concrete stores are kept so tests can seed data and inspect the
/// queue directly.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub config: ServerConfig,
    pub runs: Arc<InMemoryRunStore>,
    pub flows: Arc<InMemoryFlowStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub usage: Arc<InMemoryUsageStore>,
    pub files: Arc<InMemoryFileStore>,
    pub pieces: Arc<InMemoryPieceRegistry>,
}

/// A run whose job has been claimed by [`WORKER_ID`].
pub struct Dispatched {
    pub run: FlowRun,
    pub job_id: JobId,
    pub queue_token: String,
    pub engine_token: String,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Must be called inside a Tokio runtime; the webhook watcher is spawned.
    pub fn with_config(config: ServerConfig) -> Self {
        let runs = Arc::new(InMemoryRunStore::new());
        let flows = Arc::new(InMemoryFlowStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let usage = Arc::new(InMemoryUsageStore::new());
        let files = Arc::new(InMemoryFileStore::new());
        let pieces = Arc::new(InMemoryPieceRegistry::new());
        let backends = Backends {
            runs: runs.clone(),
            flows: flows.clone(),
            queue: queue.clone(),
            usage: usage.clone(),
            files: files.clone(),
            pieces: pieces.clone(),
        };

        let webhook_watcher = Arc::new(WebhookResponseWatcher::new(
            "test-handler",
            Arc::new(InMemoryBroker::new()),
            config.webhook_timeout(),
        ));
        webhook_watcher.spawn();

        let event_bus = Arc::new(EventBus::default());
        let coordinator = Arc::new(RunCoordinator::new(
            &backends,
            Arc::clone(&webhook_watcher),
            Arc::clone(&event_bus),
            CoordinatorSettings {
                edition: config.edition,
                environment: config.environment,
                max_consecutive_trigger_failures: config.max_consecutive_trigger_failures,
            },
        ));

        let state = AppState {
            pool: None,
            config: Arc::new(config.clone()),
            coordinator,
            queue: backends.queue.clone(),
            webhook_watcher,
            ws_manager: Arc::new(WsManager::new()),
            event_bus,
        };
        let router = build_app_router(state.clone(), &config);

        Self {
            router,
            state,
            config,
            runs,
            flows,
            queue,
            usage,
            files,
            pieces,
        }
    }

    /// Create an enabled, published flow in `project_id`.
    pub async fn create_flow(&self, project_id: DbId) -> PopulatedFlow {
        self.flows
            .create_flow(
                project_id,
                "Test flow",
                serde_json::json!({
                    "name": "trigger",
                    "settings": { "pieceName": "webhook", "pieceVersion": "^0.1.0" }
                }),
            )
            .await
    }

    /// Start a run of `flow` and claim its job as [`WORKER_ID`].
    pub async fn dispatch(&self, flow: PopulatedFlow) -> Dispatched {
        let run = self
            .state
            .coordinator
            .start_run(StartRun {
                flow,
                trigger_payload: serde_json::json!({}),
                reply_to: None,
            })
            .await
            .expect("run should start");
        let claimed = self
            .queue
            .claim(QueueName::OneTime, WORKER_ID)
            .await
            .expect("claim should succeed")
            .expect("a job should be queued");
        let engine_token = self.engine_token(claimed.job.id, run.project_id, &claimed.token);
        Dispatched {
            run,
            job_id: claimed.job.id,
            queue_token: claimed.token,
            engine_token,
        }
    }

    pub fn engine_token(&self, job_id: JobId, project_id: DbId, queue_token: &str) -> String {
        generate_engine_token(job_id, project_id, queue_token, &self.config.jwt)
            .expect("engine token")
    }

    pub fn worker_token(&self) -> String {
        generate_worker_token(WORKER_ID, &self.config.jwt).expect("worker token")
    }

    /// A USER token as the sign-in service would issue it.
    pub fn user_token(&self, project_id: DbId) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "user-1".to_string(),
            principal_type: PrincipalType::User,
            project_id: Some(project_id),
            queue_token: None,
            exp: now + 600,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.config.jwt.secret.as_bytes()),
        )
        .expect("user token")
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes()
        .to_vec()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get_auth(app: &Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json_auth(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}
