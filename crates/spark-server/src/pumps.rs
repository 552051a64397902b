//! Per-connection read and write loops.
//!
//! The write pump is the only writer on the transport. The read pump is the
//! only reader, and its exit always hands the connection back to the registry
//! for eviction through [`EvictGuard`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use spark_core::Frame;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HubConfig;
use crate::connection::{Connection, Mailbox};
use crate::hub::Hub;
use crate::router::MessageRouter;

pub const ERR_INVALID_FORMAT: &str = "Invalid message format";

/// Why the read pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEnd {
    PeerClosed,
    DeadlineExpired,
    Oversized,
    TransportClosed,
    TransportError,
}

/// Why the write pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteEnd {
    MailboxClosed,
    TransportClosed,
    WriteFailed,
    WriteTimeout,
}

/// Requests eviction of its connection when dropped, whatever path the read
/// pump leaves by.
pub struct EvictGuard {
    hub: Hub,
    conn: Arc<Connection>,
}

impl EvictGuard {
    pub fn new(hub: Hub, conn: Arc<Connection>) -> Self {
        Self { hub, conn }
    }
}

impl Drop for EvictGuard {
    fn drop(&mut self) {
        self.hub.request_evict(Arc::clone(&self.conn));
    }
}

/// Read frames until the peer goes away, the read deadline passes, or the
/// transport is closed from our side.
pub async fn read_pump<S, E>(
    mut stream: S,
    conn: &Arc<Connection>,
    router: &dyn MessageRouter,
    config: &HubConfig,
) -> ReadEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let transport = conn.transport_token().cloned().unwrap_or_default();
    let pong_wait = config.pong_wait();
    let deadline = tokio::time::sleep(pong_wait);
    tokio::pin!(deadline);

    loop {
        let next = tokio::select! {
            () = transport.cancelled() => return ReadEnd::TransportClosed,
            () = &mut deadline => {
                info!(connection_id = %conn.id(), "Read deadline expired");
                return ReadEnd::DeadlineExpired;
            }
            next = stream.next() => next,
        };

        let msg = match next {
            None => return ReadEnd::PeerClosed,
            Some(Err(e)) => {
                debug!(connection_id = %conn.id(), error = %e, "Transport read failed");
                return ReadEnd::TransportError;
            }
            Some(Ok(msg)) => msg,
        };

        deadline.as_mut().reset(Instant::now() + pong_wait);

        let decoded = match &msg {
            Message::Text(text) => {
                if text.len() > config.max_frame_bytes {
                    warn!(connection_id = %conn.id(), size = text.len(), "Inbound frame too large");
                    return ReadEnd::Oversized;
                }
                Frame::decode(text.as_str())
            }
            Message::Binary(data) => {
                if data.len() > config.max_frame_bytes {
                    warn!(connection_id = %conn.id(), size = data.len(), "Inbound frame too large");
                    return ReadEnd::Oversized;
                }
                Frame::decode_slice(data)
            }
            Message::Ping(_) | Message::Pong(_) => {
                trace!(connection_id = %conn.id(), "Keepalive");
                continue;
            }
            Message::Close(_) => return ReadEnd::PeerClosed,
        };

        match decoded {
            Ok(frame) => router.route(conn, frame).await,
            Err(e) => {
                debug!(connection_id = %conn.id(), error = %e, "Undecodable frame");
                let _ = conn.send(&Frame::error(ERR_INVALID_FORMAT));
            }
        }
    }
}

/// Drain the mailbox into the transport and keep the peer alive with pings.
///
/// Cancels `transport` on exit so the read pump stops too.
pub async fn write_pump<W>(mut sink: W, mut mailbox: Mailbox, transport: CancellationToken, config: &HubConfig) -> WriteEnd
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let write_wait = config.write_wait();
    let mut ping = tokio::time::interval(config.ping_period());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ping.tick().await;

    let end = loop {
        tokio::select! {
            biased;
            next = mailbox.recv() => {
                let Some(mut batch) = next else {
                    let _ = send_within(&mut sink, Message::Close(None), write_wait).await;
                    break WriteEnd::MailboxClosed;
                };
                while let Some(more) = mailbox.try_recv() {
                    batch.push('\n');
                    batch.push_str(&more);
                }
                if let Err(end) = send_within(&mut sink, Message::Text(batch.into()), write_wait).await {
                    break end;
                }
            }
            _ = ping.tick() => {
                if let Err(end) = send_within(&mut sink, Message::Ping(Bytes::new()), write_wait).await {
                    break end;
                }
                trace!("Sent ping");
            }
            () = transport.cancelled() => break WriteEnd::TransportClosed,
        }
    };

    let _ = tokio::time::timeout(write_wait, sink.close()).await;
    transport.cancel();
    end
}

async fn send_within<W>(sink: &mut W, msg: Message, wait: Duration) -> Result<(), WriteEnd>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match tokio::time::timeout(wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Transport write failed");
            Err(WriteEnd::WriteFailed)
        }
        Err(_) => {
            warn!(wait_secs = wait.as_secs(), "Transport write timed out");
            Err(WriteEnd::WriteTimeout)
        }
    }
}

/// Run both pumps for an admitted connection until it is done.
pub async fn serve_connection(
    socket: WebSocket,
    conn: Arc<Connection>,
    mailbox: Mailbox,
    hub: Hub,
    router: Arc<dyn MessageRouter>,
    config: HubConfig,
) {
    let (sink, stream) = socket.split();
    let transport = conn.transport_token().cloned().unwrap_or_default();

    let writer_config = config.clone();
    let writer = tokio::spawn(async move { write_pump(sink, mailbox, transport, &writer_config).await });

    let guard = EvictGuard::new(hub, Arc::clone(&conn));
    let read_end = read_pump(stream, &conn, router.as_ref(), &config).await;
    drop(guard);

    let write_end = writer.await.ok();
    info!(
        connection_id = %conn.id(),
        user_id = %conn.user_id(),
        age_secs = conn.age().as_secs(),
        dropped = conn.drop_count(),
        read = ?read_end,
        write = ?write_end,
        "Client disconnected"
    );
}
