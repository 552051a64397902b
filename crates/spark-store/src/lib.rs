//! # spark-store
//!
//! SQLite persistence behind the hub's storage collaborators:
//! [`WebsiteRepo`] answers ownership checks, [`ChatRepo`] records chat turns.

#![deny(unsafe_code)]

pub mod chats;
pub mod database;
pub mod error;
pub mod schema;
pub mod websites;

pub use chats::{ChatRepo, ChatRow};
pub use database::Database;
pub use error::StoreError;
pub use websites::{NewWebsite, WebsiteRepo, WebsiteRow};
