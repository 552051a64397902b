//! Wire envelope for every message exchanged with a client.
//!
//! One JSON object per logical frame. `type` is required; every other field is
//! optional and omitted from the encoding when unset, so a frame carries exactly
//! the fields relevant to its kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ConnectionId, MessageId, UserId};
use crate::messages::Role;

/// Discriminant carried in the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    #[serde(rename = "chat:message")]
    ChatMessage,
    #[serde(rename = "chat:stream")]
    ChatStream,
    #[serde(rename = "chat:typing")]
    ChatTyping,
    #[serde(rename = "website:join")]
    WebsiteJoin,
    #[serde(rename = "website:leave")]
    WebsiteLeave,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "disconnected")]
    Disconnected,
    /// Any `type` string this server does not know. Decodes successfully so the
    /// router can answer with an error frame instead of a decode failure.
    #[serde(rename = "unknown")]
    #[serde(other)]
    Unknown,
}

impl FrameType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatMessage => "chat:message",
            Self::ChatStream => "chat:stream",
            Self::ChatTyping => "chat:typing",
            Self::WebsiteJoin => "website:join",
            Self::WebsiteLeave => "website:leave",
            Self::Error => "error",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single application-level message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Clients may send any string here; roles this server does not model
    /// decode as `None` rather than failing the frame.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_role"
    )]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

fn lenient_role<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Role>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|role| role.parse().ok()))
}

impl Frame {
    /// Empty frame of the given kind, stamped with the current time.
    pub fn new(kind: FrameType) -> Self {
        Self {
            kind,
            id: None,
            user_id: None,
            content: None,
            role: None,
            chunk: None,
            is_typing: None,
            website_id: None,
            timestamp: Some(Utc::now()),
            error: None,
            metadata: None,
        }
    }

    /// Sent once to a freshly admitted connection.
    pub fn connected(connection_id: &ConnectionId, user_id: &UserId) -> Self {
        Self::new(FrameType::Connected)
            .with_id(connection_id.as_str())
            .with_user(user_id.as_str())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(FrameType::Error)
        }
    }

    pub fn chat_message(id: &MessageId, role: Role, content: impl Into<String>) -> Self {
        Self::new(FrameType::ChatMessage)
            .with_id(id.as_str())
            .with_role(role)
            .with_content(content)
    }

    pub fn chat_stream(id: &MessageId, chunk: impl Into<String>) -> Self {
        Self {
            chunk: Some(chunk.into()),
            ..Self::new(FrameType::ChatStream).with_id(id.as_str())
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn with_typing(mut self, is_typing: bool) -> Self {
        self.is_typing = Some(is_typing);
        self
    }

    #[must_use]
    pub fn with_website(mut self, website_id: impl Into<String>) -> Self {
        self.website_id = Some(website_id.into());
        self
    }

    /// Serialize to the single-line JSON text written to the transport.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn decode_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Non-empty content, if any.
    pub fn content_text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}
