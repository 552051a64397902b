//! # spark-server
//!
//! Realtime hub for SiteSpark clients.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `hub` | Single-writer registry: one live connection per identity |
//! | `connection` | Connection handle and its bounded outbound mailbox |
//! | `pumps` | Per-connection read/write loops, keepalive, eviction guard |
//! | `router` | Inbound frame dispatch by `type` |
//! | `bridge` | Streaming chat turns against a completion source |
//! | `conversation` | Bounded per-identity conversation windows |
//! | `auth` | HS256 bearer token verification |
//! | `server` | Axum routes (`/ws`, `/health`) and lifecycle |
//!
//! ## Data Flow
//!
//! `server` authenticates and upgrades → `hub` admits → `pumps` read frames →
//! `router` → `bridge` streams chunks back through the connection's mailbox.

#![deny(unsafe_code)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod health;
pub mod hub;
pub mod pumps;
pub mod router;
pub mod server;
pub mod shutdown;

pub use auth::{Claims, JwtVerifier};
pub use bridge::{StreamingBridge, TurnOutcome};
pub use config::{BridgeConfig, HubConfig, ServerConfig};
pub use connection::{Connection, Mailbox};
pub use conversation::{ConversationStore, ConversationWindow};
pub use hub::{Hub, HubError};
pub use router::{ChatRouter, MessageRouter};
pub use server::{AppState, ServerDeps, ServerHandle, build_router, start};
pub use shutdown::ShutdownCoordinator;
