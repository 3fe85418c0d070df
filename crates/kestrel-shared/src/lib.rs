//! # kestrel-shared
//!
//! Types shared between the Kestrel server and its clients: identifier
//! newtypes, role flags, the public user projection, and the WebSocket
//! wire protocol.

pub mod protocol;
pub mod types;

pub use protocol::PublicUser;
pub use types::{ConnectionId, ConversationId, GroupId, MessageId, Role, UserId};
