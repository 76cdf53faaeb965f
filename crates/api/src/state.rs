use std::sync::Arc;

use flowline_core::memory::{
    InMemoryFileStore, InMemoryFlowStore, InMemoryJobQueue, InMemoryPieceRegistry,
    InMemoryRunStore, InMemoryUsageStore,
};
use flowline_core::queue::JobQueue;
use flowline_core::store::{FileStore, FlowStore, PieceRegistry, RunStore, UsageStore};
use flowline_db::stores::{
    PgFileStore, PgFlowStore, PgJobQueue, PgPieceRegistry, PgRunStore, PgUsageStore,
};
use flowline_db::DbPool;
use flowline_events::{EventBus, WebhookResponseWatcher};

use crate::config::ServerConfig;
use crate::engine::RunCoordinator;
use crate::ws::WsManager;

/// The storage backends the coordinator runs against.
#[derive(Clone)]
pub struct Backends {
    pub runs: Arc<dyn RunStore>,
    pub flows: Arc<dyn FlowStore>,
    pub queue: Arc<dyn JobQueue>,
    pub usage: Arc<dyn UsageStore>,
    pub files: Arc<dyn FileStore>,
    pub pieces: Arc<dyn PieceRegistry>,
}

impl Backends {
    /// Single-process backends; state is lost on restart.
    pub fn in_memory() -> Self {
        Self {
            runs: Arc::new(InMemoryRunStore::new()),
            flows: Arc::new(InMemoryFlowStore::new()),
            queue: Arc::new(InMemoryJobQueue::new()),
            usage: Arc::new(InMemoryUsageStore::new()),
            files: Arc::new(InMemoryFileStore::new()),
            pieces: Arc::new(InMemoryPieceRegistry::new()),
        }
    }

    pub fn postgres(pool: &DbPool) -> Self {
        Self {
            runs: Arc::new(PgRunStore::new(pool.clone())),
            flows: Arc::new(PgFlowStore::new(pool.clone())),
            queue: Arc::new(PgJobQueue::new(pool.clone())),
            usage: Arc::new(PgUsageStore::new(pool.clone())),
            files: Arc::new(PgFileStore::new(pool.clone())),
            pieces: Arc::new(PgPieceRegistry::new(pool.clone())),
        }
    }
}

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool; `None` when running on in-memory backends.
    pub pool: Option<DbPool>,
    pub config: Arc<ServerConfig>,
    /// Run lifecycle coordinator.
    pub coordinator: Arc<RunCoordinator>,
    /// Job queue workers poll.
    pub queue: Arc<dyn JobQueue>,
    /// Pending synchronous webhook replies owned by this process.
    pub webhook_watcher: Arc<WebhookResponseWatcher>,
    /// WebSocket connection manager.
    pub ws_manager: Arc<WsManager>,
    /// Centralized event bus for run progress events.
    pub event_bus: Arc<EventBus>,
}
