//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::Hub;

/// Default bound on draining server tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Stops the listener, closes every live connection, then waits for tasks.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, drain the registry and await `handles` for at most
    /// `timeout` (30s when `None`).
    pub async fn graceful_shutdown(&self, hub: &Hub, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.token.cancel();

        let live = hub.count();
        if hub.shutdown().await.is_err() {
            warn!("Registry already stopped");
        }
        info!(connections = live, tasks = handles.len(), timeout_secs = timeout.as_secs(), "Draining server tasks");

        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}
