//! Collaborators the hub consults but does not own.
//!
//! All three are synchronous; async callers run them on the blocking pool.

use crate::errors::{AuthError, ServiceError};
use crate::ids::{UserId, WebsiteId};
use crate::messages::Role;

/// Maps an opaque credential to a verified identity.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Answers whether a user may attach to a website.
pub trait OwnershipCheck: Send + Sync {
    fn owns_website(&self, user: &UserId, website: &WebsiteId) -> Result<bool, ServiceError>;
}

/// One side of a completed chat turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedTurn {
    pub user_id: UserId,
    pub website_id: Option<WebsiteId>,
    pub role: Role,
    pub content: String,
}

/// Durable sink for completed turns. Writes are fire-and-forget from the
/// hub's point of view; failures are logged, never surfaced to the client.
pub trait TurnStore: Send + Sync {
    fn persist_turn(&self, turn: &PersistedTurn) -> Result<(), ServiceError>;
}
