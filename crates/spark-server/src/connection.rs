//! One live client session and its outbound mailbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use spark_core::{ConnectionId, Frame, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Represents a connected client.
///
/// Closing is split in two: closing the mailbox stops the outbound pump after
/// it drains what is already queued, closing the transport interrupts both
/// pumps' blocking waits. Both are idempotent.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    /// Send side of the outbound mailbox.
    tx: mpsc::Sender<String>,
    mailbox_closed: CancellationToken,
    /// `None` for connections with no physical transport (tests, internal clients).
    transport: Option<CancellationToken>,
    connected_at: Instant,
    /// Count of frames dropped due to a full mailbox.
    dropped_frames: AtomicU64,
}

/// Receive side of a connection's outbound queue, owned by the outbound pump.
pub struct Mailbox {
    rx: mpsc::Receiver<String>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection backed by a physical transport.
    pub fn new(user_id: UserId, capacity: usize) -> (Arc<Self>, Mailbox) {
        Self::build(user_id, capacity, Some(CancellationToken::new()))
    }

    /// Create a connection with no transport. Admitting it sends no `connected` frame.
    pub fn detached(user_id: UserId, capacity: usize) -> (Arc<Self>, Mailbox) {
        Self::build(user_id, capacity, None)
    }

    fn build(user_id: UserId, capacity: usize, transport: Option<CancellationToken>) -> (Arc<Self>, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            tx,
            mailbox_closed: closed.clone(),
            transport,
            connected_at: Instant::now(),
            dropped_frames: AtomicU64::new(0),
        });
        (conn, Mailbox { rx, closed })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Cancelled once the transport is closed.
    pub fn transport_token(&self) -> Option<&CancellationToken> {
        self.transport.as_ref()
    }

    /// Queue serialized text without waiting.
    ///
    /// Returns `false` if the mailbox is full or closed. A full mailbox drops
    /// the frame and increments the dropped counter.
    pub fn enqueue(&self, text: String) -> bool {
        if self.mailbox_closed.is_cancelled() {
            debug!(connection_id = %self.id, "Mailbox closed, discarding frame");
            return false;
        }
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = %self.id, user_id = %self.user_id, "Mailbox full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize a frame and queue it.
    pub fn send(&self, frame: &Frame) -> bool {
        match frame.encode() {
            Ok(text) => self.enqueue(text),
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Failed to encode frame");
                false
            }
        }
    }

    pub fn close_mailbox(&self) {
        self.mailbox_closed.cancel();
    }

    pub fn close_transport(&self) {
        if let Some(transport) = &self.transport {
            transport.cancel();
        }
    }

    pub fn close(&self) {
        self.close_mailbox();
        self.close_transport();
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox_closed.is_cancelled()
    }

    /// Resolves once the mailbox has been closed.
    pub async fn closed(&self) {
        self.mailbox_closed.cancelled().await;
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Mailbox {
    /// Next queued frame. Returns `None` once the mailbox is closed and empty.
    pub async fn recv(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            text = self.rx.recv() => text,
            () = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// Frame already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
