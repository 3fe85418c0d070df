//! Shared fixtures for server tests: an in-memory store behind a real
//! [`ChatServer`], plus helpers to attach fake connections and inspect
//! what was emitted to them.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use kestrel_shared::protocol::{ConversationNotification, PublicUser, ServerEvent};
use kestrel_shared::types::ConnectionId;
use kestrel_store::{Database, User};

use crate::config::ServerConfig;
use crate::server::ChatServer;
use crate::state::ConnectionHandle;

pub struct TestServer {
    pub server: ChatServer,
}

impl TestServer {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        Self {
            server: ChatServer::new(db, ServerConfig::default()),
        }
    }

    pub fn persist_user(&self, user: User) -> User {
        self.server.db().create_user(&user).expect("create user");
        user
    }

    /// Attach a fake connection and run the full join flow.  The returned
    /// receiver sees everything the server emits to this connection.
    pub async fn connect(&self, user: &User) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let (handle, rx) = ConnectionHandle::new(conn, user.clone());
        self.server.join(handle).await;
        (conn, rx)
    }

    /// Collect everything currently queued on a connection.
    pub fn drain(&self, rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// The most recent `updateUsers` map queued on a connection, if any.
    pub fn last_update_users(
        &self,
        rx: &mut mpsc::Receiver<ServerEvent>,
    ) -> Option<BTreeMap<String, PublicUser>> {
        self.drain(rx).into_iter().rev().find_map(|event| match event {
            ServerEvent::UpdateUsers(map) => Some(map),
            _ => None,
        })
    }

    /// The most recent conversation-notification batch queued on a
    /// connection, if any.
    pub fn last_conversations(
        &self,
        rx: &mut mpsc::Receiver<ServerEvent>,
    ) -> Option<Vec<ConversationNotification>> {
        self.drain(rx).into_iter().rev().find_map(|event| match event {
            ServerEvent::UpdateConversationsNotifications { conversations } => {
                Some(conversations)
            }
            _ => None,
        })
    }
}
