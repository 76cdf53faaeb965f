use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flowline_api::config::ServerConfig;
use flowline_api::engine::{ClaimSweeper, CoordinatorSettings, ProgressRelay, RunCoordinator};
use flowline_api::router::build_app_router;
use flowline_api::state::{AppState, Backends};
use flowline_api::ws;
use flowline_events::{EventBus, InMemoryBroker, PgNotifyBroker, ResponseBroker, WebhookResponseWatcher};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "flowline_api=debug,flowline_events=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        edition = %config.edition,
        environment = %config.environment,
        "Loaded server configuration",
    );

    // --- Storage backends ---
    let (pool, backends, broker, broker_handle) = match &config.database_url {
        Some(database_url) => {
            let pool = flowline_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            flowline_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            flowline_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            let (broker, handle) = PgNotifyBroker::start(pool.clone())
                .await
                .expect("Failed to listen for webhook replies");
            let backends = Backends::postgres(&pool);
            (Some(pool), backends, broker as Arc<dyn ResponseBroker>, Some(handle))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on in-memory backends");
            (
                None,
                Backends::in_memory(),
                Arc::new(InMemoryBroker::new()) as Arc<dyn ResponseBroker>,
                None,
            )
        }
    };

    // --- Webhook reply correlation ---
    let handler_id = uuid::Uuid::new_v4().to_string();
    let webhook_watcher = Arc::new(WebhookResponseWatcher::new(
        handler_id.clone(),
        broker,
        config.webhook_timeout(),
    ));
    let watcher_handle = webhook_watcher.spawn();
    tracing::info!(handler_id = %handler_id, "Webhook reply watcher started");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // --- Coordinator ---
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

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());

    // --- Heartbeat ---
    let background_cancel = tokio_util::sync::CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&ws_manager),
        ws::HEARTBEAT_INTERVAL,
        background_cancel.clone(),
    );

    // Spawn progress relay (routes run events to project WebSockets).
    let relay = ProgressRelay::new(Arc::clone(&ws_manager));
    let relay_handle = tokio::spawn(relay.run(event_bus.subscribe()));

    // Spawn claim sweeper (redelivers jobs whose claim expired).
    let sweeper = ClaimSweeper::new(
        Arc::clone(&backends.queue),
        config.claim_timeout(),
        config.sweep_interval(),
    );
    let sweeper_cancel = background_cancel.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_cancel).await;
    });

    tracing::info!("Background services started (relay, claim sweeper, heartbeat)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        coordinator,
        queue: Arc::clone(&backends.queue),
        webhook_watcher,
        ws_manager: Arc::clone(&ws_manager),
        event_bus: Arc::clone(&event_bus),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    background_cancel.cancel();
    let _ = tokio::time::timeout(drain, sweeper_handle).await;
    tracing::info!("Claim sweeper stopped");

    // The router (and every state clone) is gone; dropping the last bus
    // handle closes the channel and ends the relay.
    drop(event_bus);
    let _ = tokio::time::timeout(drain, relay_handle).await;
    tracing::info!("Progress relay shut down");

    watcher_handle.abort();
    if let Some(handle) = broker_handle {
        handle.abort();
    }

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    let _ = tokio::time::timeout(drain, heartbeat_handle).await;
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
