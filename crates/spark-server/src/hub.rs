//! Connection registry.
//!
//! A single task owns every mutation of the identity → connection table.
//! Admit, evict, dispatch and broadcast are commands on one unbounded channel
//! and are applied strictly in arrival order. Readers (`count`,
//! `is_connected`) take a shared lock on the table instead of going through
//! the loop; only the loop ever takes the write lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use spark_core::{Frame, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;

type Table = Arc<RwLock<HashMap<UserId, Arc<Connection>>>>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("registry loop has stopped")]
    Stopped,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

enum Command {
    Admit {
        conn: Arc<Connection>,
        ack: oneshot::Sender<()>,
    },
    Evict {
        conn: Arc<Connection>,
        ack: Option<oneshot::Sender<()>>,
    },
    Dispatch {
        user_id: UserId,
        text: String,
    },
    Broadcast {
        text: String,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the registry loop. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<Command>,
    table: Table,
}

impl Hub {
    /// Start the registry loop.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let table: Table = Arc::new(RwLock::new(HashMap::new()));
        let handle = tokio::spawn(run(rx, Arc::clone(&table)));
        (Self { tx, table }, handle)
    }

    /// Install `conn` as the live connection for its identity, closing any
    /// previous one. Resolves once the loop has applied it.
    pub async fn admit(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Admit { conn, ack })
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Remove `conn` if it is still the one on file, and close it.
    pub async fn evict(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Evict { conn, ack: Some(ack) })
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Fire-and-forget eviction, usable from `Drop`.
    pub fn request_evict(&self, conn: Arc<Connection>) {
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(Command::Evict { conn, ack: None }) {
            // Loop is gone; still honour the close half of the contract.
            if let Command::Evict { conn, .. } = cmd {
                conn.close();
            }
        }
    }

    /// Best-effort delivery to one identity. Absent recipients are not an error.
    pub fn dispatch_to(&self, user_id: &UserId, frame: &Frame) -> Result<(), HubError> {
        let text = frame.encode()?;
        self.tx
            .send(Command::Dispatch {
                user_id: user_id.clone(),
                text,
            })
            .map_err(|_| HubError::Stopped)
    }

    /// Best-effort delivery to every live connection. Serialized once.
    pub fn broadcast(&self, frame: &Frame) -> Result<(), HubError> {
        let text = frame.encode()?;
        self.tx
            .send(Command::Broadcast { text })
            .map_err(|_| HubError::Stopped)
    }

    pub fn count(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.table.read().contains_key(user_id)
    }

    /// Close every live connection and stop the loop.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { ack })
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, table: Table) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Admit { conn, ack } => {
                admit_now(&table, conn);
                let _ = ack.send(());
            }
            Command::Evict { conn, ack } => {
                evict_now(&table, &conn);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Dispatch { user_id, text } => {
                let target = table.read().get(&user_id).cloned();
                match target {
                    Some(conn) => {
                        let _ = conn.enqueue(text);
                    }
                    None => debug!(user_id = %user_id, "Dispatch target offline, dropping frame"),
                }
            }
            Command::Broadcast { text } => {
                let targets: Vec<Arc<Connection>> = table.read().values().cloned().collect();
                for conn in targets {
                    let _ = conn.enqueue(text.clone());
                }
            }
            Command::Shutdown { ack } => {
                let drained: Vec<Arc<Connection>> = table.write().drain().map(|(_, c)| c).collect();
                info!(connections = drained.len(), "Registry shutting down");
                for conn in drained {
                    conn.close();
                }
                let _ = ack.send(());
                break;
            }
        }
    }
    debug!("Registry loop ended");
}

fn admit_now(table: &Table, conn: Arc<Connection>) {
    let previous = table
        .write()
        .insert(conn.user_id().clone(), Arc::clone(&conn));

    if let Some(prev) = previous {
        if !Arc::ptr_eq(&prev, &conn) {
            info!(
                user_id = %conn.user_id(),
                old_connection_id = %prev.id(),
                new_connection_id = %conn.id(),
                "Replacing existing connection"
            );
            prev.close();
        }
    }

    info!(user_id = %conn.user_id(), connection_id = %conn.id(), "Client admitted");

    if conn.has_transport() && !conn.send(&Frame::connected(conn.id(), conn.user_id())) {
        warn!(connection_id = %conn.id(), "Failed to queue connected frame");
    }
}

fn evict_now(table: &Table, conn: &Arc<Connection>) {
    let removed = {
        let mut table = table.write();
        match table.get(conn.user_id()) {
            Some(current) if Arc::ptr_eq(current, conn) => table.remove(conn.user_id()).is_some(),
            _ => false,
        }
    };
    if removed {
        info!(user_id = %conn.user_id(), connection_id = %conn.id(), "Client evicted");
    } else {
        debug!(connection_id = %conn.id(), "Stale evict, connection not on file");
    }
    conn.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Mailbox;
    use spark_core::FrameType;

    fn user(name: &str) -> UserId {
        UserId::from_raw(name)
    }

    fn connect(name: &str) -> (Arc<Connection>, Mailbox) {
        Connection::new(user(name), 16)
    }

    #[tokio::test]
    async fn admit_sends_connected_frame() {
        let (hub, _loop) = Hub::spawn();
        let (conn, mut mailbox) = connect("alice");
        hub.admit(Arc::clone(&conn)).await.unwrap();

        let frame = Frame::decode(&mailbox.recv().await.unwrap()).unwrap();
        assert_eq!(frame.kind, FrameType::Connected);
        assert_eq!(frame.id.as_deref(), Some(conn.id().as_str()));
        assert_eq!(frame.user_id.as_deref(), Some("alice"));
        assert_eq!(hub.count(), 1);
        assert!(hub.is_connected(&user("alice")));
    }

    #[tokio::test]
    async fn detached_admit_sends_nothing() {
        let (hub, _loop) = Hub::spawn();
        let (conn, mut mailbox) = Connection::detached(user("alice"), 4);
        hub.admit(conn).await.unwrap();
        assert!(mailbox.try_recv().is_none());
        assert_eq!(hub.count(), 1);
    }

    #[tokio::test]
    async fn readmit_replaces_and_closes_previous() {
        let (hub, _loop) = Hub::spawn();
        let mut previous: Vec<Arc<Connection>> = Vec::new();
        for _ in 0..5 {
            let (conn, _mailbox) = connect("alice");
            hub.admit(Arc::clone(&conn)).await.unwrap();
            previous.push(conn);
        }
        assert_eq!(hub.count(), 1);
        let (live, older) = previous.split_last().unwrap();
        assert!(!live.is_closed());
        for conn in older {
            assert!(conn.is_closed());
            assert!(conn.transport_token().unwrap().is_cancelled());
        }
    }

    #[tokio::test]
    async fn readmit_same_connection_keeps_it_open() {
        let (hub, _loop) = Hub::spawn();
        let (conn, _mailbox) = connect("alice");
        hub.admit(Arc::clone(&conn)).await.unwrap();
        hub.admit(Arc::clone(&conn)).await.unwrap();
        assert!(!conn.is_closed());
        assert_eq!(hub.count(), 1);
    }

    #[tokio::test]
    async fn stale_evict_keeps_newer_connection() {
        let (hub, _loop) = Hub::spawn();
        let (old, _m1) = connect("alice");
        let (new, _m2) = connect("alice");
        hub.admit(Arc::clone(&old)).await.unwrap();
        hub.admit(Arc::clone(&new)).await.unwrap();

        hub.evict(Arc::clone(&old)).await.unwrap();
        assert!(hub.is_connected(&user("alice")));
        assert!(!new.is_closed());

        hub.evict(Arc::clone(&new)).await.unwrap();
        assert!(!hub.is_connected(&user("alice")));
        assert!(new.is_closed());
    }

    #[tokio::test]
    async fn double_evict_is_harmless() {
        let (hub, _loop) = Hub::spawn();
        let (conn, _mailbox) = connect("alice");
        hub.admit(Arc::clone(&conn)).await.unwrap();
        hub.evict(Arc::clone(&conn)).await.unwrap();
        hub.evict(Arc::clone(&conn)).await.unwrap();
        hub.request_evict(Arc::clone(&conn));
        hub.evict(conn).await.unwrap();
        assert_eq!(hub.count(), 0);
    }

    #[tokio::test]
    async fn dispatch_to_offline_identity_is_noop() {
        let (hub, _loop) = Hub::spawn();
        hub.dispatch_to(&user("ghost"), &Frame::error("nobody home")).unwrap();
        let (conn, _mailbox) = connect("alice");
        hub.admit(conn).await.unwrap();
        assert_eq!(hub.count(), 1);
    }

    #[tokio::test]
    async fn dispatch_reaches_only_target() {
        let (hub, _loop) = Hub::spawn();
        let (alice, mut alice_box) = Connection::detached(user("alice"), 4);
        let (bob, mut bob_box) = Connection::detached(user("bob"), 4);
        hub.admit(alice).await.unwrap();
        hub.admit(bob).await.unwrap();

        hub.dispatch_to(&user("bob"), &Frame::error("for bob")).unwrap();
        let text = bob_box.recv().await.unwrap();
        assert_eq!(Frame::decode(&text).unwrap().error.as_deref(), Some("for bob"));
        assert!(alice_box.try_recv().is_none());
    }

    #[tokio::test]
    async fn broadcast_is_byte_identical() {
        let (hub, _loop) = Hub::spawn();
        let mut boxes = Vec::new();
        for name in ["a", "b", "c"] {
            let (conn, mailbox) = Connection::detached(user(name), 4);
            hub.admit(conn).await.unwrap();
            boxes.push(mailbox);
        }

        let frame = Frame::new(FrameType::ChatTyping).with_user("a").with_typing(true);
        hub.broadcast(&frame).unwrap();

        let mut received = Vec::new();
        for mailbox in &mut boxes {
            received.push(mailbox.recv().await.unwrap());
        }
        assert!(received.windows(2).all(|w| w[0] == w[1]));
        let decoded = Frame::decode(&received[0]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn broadcast_skips_full_mailbox() {
        let (hub, _loop) = Hub::spawn();
        let (slow, mut slow_box) = Connection::detached(user("slow"), 1);
        let (fast, mut fast_box) = Connection::detached(user("fast"), 4);
        hub.admit(Arc::clone(&slow)).await.unwrap();
        hub.admit(fast).await.unwrap();

        hub.broadcast(&Frame::error("one")).unwrap();
        hub.broadcast(&Frame::error("two")).unwrap();
        let _ = fast_box.recv().await.unwrap();
        let _ = fast_box.recv().await.unwrap();

        assert_eq!(slow.drop_count(), 1);
        assert!(slow_box.try_recv().is_some());
        assert!(slow_box.try_recv().is_none());
    }

    #[tokio::test]
    async fn concurrent_admit_evict_storm_leaves_empty_table() {
        let (hub, _loop) = Hub::spawn();
        let mut tasks = Vec::new();
        for i in 0..10 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (conn, _mailbox) = Connection::new(UserId::from_raw(format!("user-{i}")), 4);
                hub.admit(Arc::clone(&conn)).await.unwrap();
                hub.evict(conn).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(hub.count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_everything_and_stops_loop() {
        let (hub, handle) = Hub::spawn();
        let (a, _ma) = connect("a");
        let (b, _mb) = connect("b");
        hub.admit(Arc::clone(&a)).await.unwrap();
        hub.admit(Arc::clone(&b)).await.unwrap();

        hub.shutdown().await.unwrap();
        handle.await.unwrap();

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(hub.count(), 0);
        let (late, _ml) = connect("late");
        assert!(matches!(hub.admit(late).await, Err(HubError::Stopped)));
    }

    #[tokio::test]
    async fn request_evict_after_stop_still_closes() {
        let (hub, handle) = Hub::spawn();
        hub.shutdown().await.unwrap();
        handle.await.unwrap();

        let (conn, _mailbox) = connect("alice");
        hub.request_evict(Arc::clone(&conn));
        assert!(conn.is_closed());
    }
}
