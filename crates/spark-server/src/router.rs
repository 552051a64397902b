//! Inbound frame dispatch by `type`.

use std::sync::Arc;

use async_trait::async_trait;
use spark_core::{Frame, FrameType, OwnershipCheck, UserId, WebsiteId};
use tracing::{debug, warn};

use crate::bridge::StreamingBridge;
use crate::connection::Connection;

pub const ERR_UNKNOWN_TYPE: &str = "Unknown message type";
pub const ERR_WEBSITE_REQUIRED: &str = "Website ID is required";
pub const ERR_WEBSITE_INVALID: &str = "Invalid website ID";
pub const ERR_WEBSITE_DENIED: &str = "Website not found or access denied";

/// Handler invoked once per decoded inbound frame, in arrival order.
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, conn: &Arc<Connection>, frame: Frame);
}

/// Routes chat, typing and website room frames.
pub struct ChatRouter {
    bridge: Arc<StreamingBridge>,
    ownership: Arc<dyn OwnershipCheck>,
}

impl ChatRouter {
    pub fn new(bridge: Arc<StreamingBridge>, ownership: Arc<dyn OwnershipCheck>) -> Self {
        Self { bridge, ownership }
    }

    fn handle_typing(conn: &Connection, frame: &Frame) {
        let echo = Frame::new(FrameType::ChatTyping)
            .with_user(conn.user_id().as_str())
            .with_typing(frame.is_typing.unwrap_or(false));
        let _ = conn.send(&echo);
    }

    async fn handle_website(&self, conn: &Connection, frame: Frame) {
        let Some(raw) = frame.website_id.as_deref().filter(|w| !w.is_empty()) else {
            let _ = conn.send(&Frame::error(ERR_WEBSITE_REQUIRED));
            return;
        };
        let Some(website_id) = WebsiteId::parse(raw) else {
            let _ = conn.send(&Frame::error(ERR_WEBSITE_INVALID));
            return;
        };

        if !self.check_access(conn.user_id(), &website_id).await {
            let _ = conn.send(&Frame::error(ERR_WEBSITE_DENIED));
            return;
        }

        debug!(user_id = %conn.user_id(), website_id = %website_id, kind = %frame.kind, "Website room confirmed");
        let _ = conn.send(&Frame::new(frame.kind).with_website(website_id.as_str()));
    }

    /// Storage is synchronous; run the lookup on the blocking pool.
    async fn check_access(&self, user_id: &UserId, website_id: &WebsiteId) -> bool {
        let ownership = Arc::clone(&self.ownership);
        let (user, site) = (user_id.clone(), website_id.clone());
        match tokio::task::spawn_blocking(move || ownership.owns_website(&user, &site)).await {
            Ok(Ok(owned)) => owned,
            Ok(Err(e)) => {
                warn!(user_id = %user_id, website_id = %website_id, error = %e, "Ownership check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Ownership check task failed");
                false
            }
        }
    }
}

#[async_trait]
impl MessageRouter for ChatRouter {
    async fn route(&self, conn: &Arc<Connection>, frame: Frame) {
        match frame.kind {
            FrameType::ChatMessage => {
                let _ = self.bridge.start_turn(conn, frame);
            }
            FrameType::ChatTyping => Self::handle_typing(conn, &frame),
            FrameType::WebsiteJoin | FrameType::WebsiteLeave => self.handle_website(conn, frame).await,
            other => {
                debug!(connection_id = %conn.id(), kind = %other, "Unroutable frame type");
                let _ = conn.send(&Frame::error(ERR_UNKNOWN_TYPE));
            }
        }
    }
}
