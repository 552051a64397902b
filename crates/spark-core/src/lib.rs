//! # spark-core
//!
//! Shared vocabulary for the SiteSpark realtime hub.
//!
//! - [`ids`]: branded identifiers (connections, messages, users, websites)
//! - [`frame`]: the JSON envelope exchanged over the duplex transport
//! - [`messages`]: role-tagged chat messages fed to completion sources
//! - [`errors`]: error taxonomy shared by the collaborator traits
//! - [`provider`] / [`services`]: the seams the hub consumes but does not implement

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod services;

pub use errors::{AuthError, CompletionError, ServiceError};
pub use frame::{Frame, FrameType};
pub use ids::{ConnectionId, MessageId, UserId, WebsiteId};
pub use messages::{ChatMessage, Role};
pub use provider::{ChunkStream, CompletionProvider};
pub use services::{CredentialVerifier, OwnershipCheck, PersistedTurn, TurnStore};
