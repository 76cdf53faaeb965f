//! Liveness pings for project progress sockets.
//!
//! Each tick pings every dashboard connection and drops the ones whose
//! forwarding task has already exited, so a project that lost its viewers
//! stops receiving `flow_run_progress` frames.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

/// Ping cadence for progress sockets.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the ping loop. It stops when `cancel` fires.
pub fn start_heartbeat(
    ws_manager: Arc<WsManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = ws_manager.ping_all().await;
                    let open = ws_manager.connection_count().await;
                    if pruned > 0 {
                        tracing::debug!(pruned, open, "Dropped dead progress sockets");
                    } else {
                        tracing::trace!(open, "Progress socket heartbeat");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;

    #[tokio::test(start_paused = true)]
    async fn pings_live_sockets_and_prunes_dead_ones() {
        let manager = Arc::new(WsManager::new());
        let mut live = manager.add("live".into(), None, Some(1)).await;
        let dead = manager.add("dead".into(), None, Some(1)).await;
        drop(dead);

        let cancel = CancellationToken::new();
        let handle = start_heartbeat(Arc::clone(&manager), Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(matches!(live.recv().await, Some(Message::Ping(_))));
        assert_eq!(manager.connection_count().await, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
