//! # kestrel-store
//!
//! SQLite-backed persistence for the Kestrel helpdesk chat core.  The crate
//! exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for accounts,
//! groups, conversations and chat messages.
//!
//! The real-time core treats this crate as an external collaborator: it only
//! ever reads group membership and conversation state here, and writes
//! nothing but last-online timestamps and open-chat-window preferences.

pub mod conversations;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
