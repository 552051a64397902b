//! Streaming chat bridge.
//!
//! One chat turn: acknowledge the user message, forward every chunk from the
//! completion source as a `chat:stream` frame, then emit exactly one terminal
//! frame. A finalized turn is the full concatenated reply as a `chat:message`;
//! a failed or timed-out turn is an `error` frame. Only finalized turns touch
//! the conversation window or storage.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use spark_core::{
    ChatMessage, CompletionError, CompletionProvider, Frame, MessageId, PersistedTurn, Role, TurnStore,
    UserId, WebsiteId,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::connection::Connection;
use crate::conversation::ConversationStore;

pub const ERR_CONTENT_REQUIRED: &str = "Message content is required";
pub const ERR_TURN_IN_PROGRESS: &str = "A response is already in progress";
pub const ERR_AI_FAILED: &str = "Failed to get AI response";
pub const ERR_AI_TIMEOUT: &str = "AI response timed out";

/// How a turn ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Finalized { message_id: MessageId, content: String },
    Failed { kind: &'static str },
    TimedOut,
    /// The connection closed before the turn ended; nothing was committed.
    Abandoned,
}

pub struct StreamingBridge {
    provider: Arc<dyn CompletionProvider>,
    turns: Arc<dyn TurnStore>,
    conversations: ConversationStore,
    /// Connection currently running a turn, per identity.
    in_flight: Arc<DashMap<UserId, Arc<Connection>>>,
    turn_timeout: Duration,
}

/// Claims an identity's turn slot for one connection until dropped.
struct TurnGuard {
    in_flight: Arc<DashMap<UserId, Arc<Connection>>>,
    conn: Arc<Connection>,
}

impl TurnGuard {
    /// A slot held by a connection that has since closed is taken over, so a
    /// reconnecting client is never blocked by its previous session's turn.
    fn acquire(in_flight: &Arc<DashMap<UserId, Arc<Connection>>>, conn: &Arc<Connection>) -> Option<Self> {
        match in_flight.entry(conn.user_id().clone()) {
            Entry::Occupied(mut held) => {
                if !held.get().is_closed() {
                    return None;
                }
                let _ = held.insert(Arc::clone(conn));
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(Arc::clone(conn));
            }
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            conn: Arc::clone(conn),
        })
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let _ = self
            .in_flight
            .remove_if(self.conn.user_id(), |_, held| Arc::ptr_eq(held, &self.conn));
    }
}

impl StreamingBridge {
    pub fn new(provider: Arc<dyn CompletionProvider>, turns: Arc<dyn TurnStore>, config: &BridgeConfig) -> Self {
        Self {
            provider,
            turns,
            conversations: ConversationStore::new(config.system_prompt.clone(), config.window_limit),
            in_flight: Arc::new(DashMap::new()),
            turn_timeout: config.turn_timeout(),
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Whether a live connection for `user_id` has a turn in flight.
    pub fn is_busy(&self, user_id: &UserId) -> bool {
        self.in_flight.get(user_id).is_some_and(|held| !held.is_closed())
    }

    /// Validate an inbound chat frame and run the turn on its own task.
    ///
    /// Returns `None` when the frame was rejected; the rejection has already
    /// been reported to the connection. The turn is dropped as soon as the
    /// connection closes.
    pub fn start_turn(self: &Arc<Self>, conn: &Arc<Connection>, frame: Frame) -> Option<JoinHandle<TurnOutcome>> {
        let Some(content) = frame.content_text().map(str::to_owned) else {
            let _ = conn.send(&Frame::error(ERR_CONTENT_REQUIRED));
            return None;
        };

        let Some(guard) = TurnGuard::acquire(&self.in_flight, conn) else {
            debug!(user_id = %conn.user_id(), "Rejecting overlapping chat turn");
            let _ = conn.send(&Frame::error(ERR_TURN_IN_PROGRESS));
            return None;
        };

        let bridge = Arc::clone(self);
        let conn = Arc::clone(conn);
        let website = frame.website_id;
        Some(tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                () = conn.closed() => {
                    debug!(user_id = %conn.user_id(), connection_id = %conn.id(), "Connection closed, abandoning chat turn");
                    TurnOutcome::Abandoned
                }
                outcome = bridge.run_turn(&conn, content, website) => outcome,
            }
        }))
    }

    /// Drive one turn to its terminal frame.
    pub async fn run_turn(&self, conn: &Connection, content: String, website: Option<String>) -> TurnOutcome {
        let user_id = conn.user_id();
        let user_turn = ChatMessage::user(content.clone());

        let _ = conn.send(&Frame::chat_message(&MessageId::new(), Role::User, content.clone()));

        let window = self.conversations.snapshot_with(user_id, user_turn.clone());
        let message_id = MessageId::new();
        debug!(user_id = %user_id, message_id = %message_id, window = window.len(), "Starting chat turn");

        let streamed = tokio::time::timeout(self.turn_timeout, self.forward_chunks(conn, &message_id, &window)).await;

        match streamed {
            Err(_) => {
                warn!(user_id = %user_id, timeout_secs = self.turn_timeout.as_secs(), "Chat turn timed out");
                let _ = conn.send(&Frame::error(ERR_AI_TIMEOUT));
                TurnOutcome::TimedOut
            }
            Ok(Err(e)) => {
                error!(user_id = %user_id, error = %e, kind = e.error_kind(), "Completion failed");
                let _ = conn.send(&Frame::error(ERR_AI_FAILED));
                TurnOutcome::Failed { kind: e.error_kind() }
            }
            Ok(Ok(full)) => {
                let _ = conn.send(&Frame::chat_message(&message_id, Role::Assistant, full.clone()));
                self.conversations
                    .commit(user_id, user_turn, ChatMessage::assistant(full.clone()));
                self.persist(user_id, website.as_deref(), content, full.clone());
                info!(user_id = %user_id, message_id = %message_id, "Chat turn finalized");
                TurnOutcome::Finalized {
                    message_id,
                    content: full,
                }
            }
        }
    }

    async fn forward_chunks(
        &self,
        conn: &Connection,
        message_id: &MessageId,
        window: &[ChatMessage],
    ) -> Result<String, CompletionError> {
        let mut stream = self.provider.stream(window).await?;
        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            full.push_str(&chunk);
            let _ = conn.send(&Frame::chat_stream(message_id, chunk));
        }
        Ok(full)
    }

    /// Hand both turns to storage on the blocking pool and return immediately.
    fn persist(&self, user_id: &UserId, website: Option<&str>, user_text: String, assistant_text: String) {
        let website_id = match website.filter(|w| !w.is_empty()) {
            None => None,
            Some(raw) => match WebsiteId::parse(raw) {
                Some(id) => Some(id),
                None => {
                    warn!(user_id = %user_id, website_id = raw, "Unparsable website id, skipping persistence");
                    return;
                }
            },
        };

        let turns = [(Role::User, user_text), (Role::Assistant, assistant_text)].map(|(role, content)| {
            PersistedTurn {
                user_id: user_id.clone(),
                website_id: website_id.clone(),
                role,
                content,
            }
        });

        let store = Arc::clone(&self.turns);
        drop(tokio::task::spawn_blocking(move || {
            for turn in &turns {
                if let Err(e) = store.persist_turn(turn) {
                    warn!(user_id = %turn.user_id, role = %turn.role, error = %e, "Failed to persist chat turn");
                }
            }
        }));
    }
}
