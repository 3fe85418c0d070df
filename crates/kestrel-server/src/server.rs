//! The chat server object: owns the presence state and the database handle,
//! and provides the notification dispatcher every handler routes through.
//!
//! Dispatch is side-effect only: fire-and-forget, no retries, no
//! acknowledgment tracking.  A connection id that is no longer in the
//! directory is an expected race (the peer disconnected between lookup and
//! emit) and is skipped silently.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use kestrel_shared::protocol::{PresenceState, ServerEvent};
use kestrel_shared::types::ConnectionId;
use kestrel_store::{Database, User};

use crate::config::ServerConfig;
use crate::state::{ChatState, ConnectionHandle};
use crate::{conversations, visibility};

/// Cheaply cloneable handle shared by every connection task.
#[derive(Clone)]
pub struct ChatServer {
    state: Arc<RwLock<ChatState>>,
    db: Arc<Mutex<Database>>,
    config: Arc<ServerConfig>,
}

impl ChatServer {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(ChatState::new())),
            db: Arc::new(Mutex::new(db)),
            config: Arc::new(config),
        }
    }

    /// The shared presence state.
    pub fn state(&self) -> &RwLock<ChatState> {
        &self.state
    }

    /// Lock the database handle.  All store calls are short and synchronous;
    /// the guard must never be held across an `.await`.
    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------

    /// Emit an event to every live connection of one online username.
    pub async fn send_to_user(&self, username: &str, event: ServerEvent) {
        let state = self.state.read().await;
        let Some(entry) = state.online_entry(username) else {
            return;
        };
        for socket in &entry.sockets {
            match state.connection(*socket) {
                Some(conn) => conn.emit(event.clone()),
                // Already disconnected: expected race, skip.
                None => {}
            }
        }
    }

    /// Emit an event on one originating connection.
    pub async fn send_to_self(&self, conn: ConnectionId, event: ServerEvent) {
        let state = self.state.read().await;
        if let Some(handle) = state.connection(conn) {
            handle.emit(event);
        }
    }

    /// Emit an event to every connected handle.
    pub async fn send_to_all(&self, event: ServerEvent) {
        let state = self.state.read().await;
        for conn in state.connections() {
            conn.emit(event.clone());
        }
    }

    // ------------------------------------------------------------------
    // Presence orchestration
    // ------------------------------------------------------------------

    /// Admit a freshly opened connection: directory insert, registry
    /// admission, join ack, saved chat windows, presence refresh.
    pub async fn join(&self, handle: ConnectionHandle) {
        let conn = handle.id;
        let user = handle.user.clone();

        {
            let mut state = self.state.write().await;
            state.insert_connection(handle);
            state.admit(&user, conn);
        }

        self.send_to_self(conn, ServerEvent::JoinSuccessfully).await;
        conversations::spawn_open_chat_windows(self, conn, &user).await;

        self.update_online_bubbles().await;
        visibility::update_users(self).await;
    }

    /// Apply a client-reported idle/active transition.
    pub async fn set_user_online_status(
        &self,
        user: &User,
        conn: ConnectionId,
        presence: PresenceState,
    ) {
        let changed = {
            let mut state = self.state.write().await;
            state.set_presence(user, conn, presence)
        };
        if changed {
            self.update_online_bubbles().await;
            visibility::update_users(self).await;
        }
    }

    /// Tear down a closed connection and refresh presence.
    pub async fn disconnect(&self, conn: ConnectionId, user: &User, reason: &str) {
        {
            let mut state = self.state.write().await;
            state.remove(&user.username, conn);
        }

        if let Err(e) = self.db().set_last_online(user.id, Utc::now()) {
            warn!(user = %user.username, error = %e, "failed to save last-online time");
        }

        let reason = if reason == "transport error" {
            "client terminated"
        } else {
            reason
        };
        debug!(user = %user.username, conn = %conn, reason, "user disconnected");

        self.update_online_bubbles().await;
        visibility::update_users(self).await;
    }

    /// Broadcast both presence partitions to every connection.
    pub async fn update_online_bubbles(&self) {
        let bubbles = { self.state.read().await.bubbles() };
        self.send_to_all(ServerEvent::UpdateOnlineBubbles(bubbles)).await;
    }

    /// Periodic safety net: push the online list, the presence bubbles and
    /// each connection's conversation notifications, regardless of events.
    pub async fn refresh(&self) {
        visibility::update_users(self).await;
        self.update_online_bubbles().await;

        let targets: Vec<(ConnectionId, User)> = {
            let state = self.state.read().await;
            state
                .connections()
                .map(|c| (c.id, c.user.clone()))
                .collect()
        };
        for (conn, user) in targets {
            conversations::update_conversations_notifications(self, conn, &user).await;
        }
    }
}
