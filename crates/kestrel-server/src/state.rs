//! Presence registry and connection directory.
//!
//! [`ChatState`] is the single mutable heart of the real-time layer: two
//! presence partitions (active and idle) keyed by username, plus the
//! directory of every live connection indexed by connection id.  It is owned
//! by [`ChatServer`](crate::server::ChatServer) behind one `RwLock`; every
//! mutator below is a plain synchronous method, so a registry update is
//! always a single atomic step with no suspension between read-check and
//! write.
//!
//! Keying rules carried over from the legacy behavior: admission checks for
//! an existing entry case-insensitively, while storage and the idle/active
//! toggle use exact-case keys.  Do not normalize casing here without a
//! product decision.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tracing::debug;

use kestrel_shared::protocol::{OnlineBubbles, PresenceState, PublicUser, ServerEvent};
use kestrel_shared::types::{ConnectionId, UserId};
use kestrel_store::User;

/// Outbound queue depth per connection.  A full queue drops events rather
/// than back-pressuring the whole dispatcher.
const OUTBOUND_QUEUE: usize = 64;

/// One live bidirectional channel, tied to a single authenticated identity
/// for its whole lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user: User,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving half its writer task drains.
    pub fn new(id: ConnectionId, user: User) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (Self { id, user, tx }, rx)
    }

    /// Fire-and-forget emission.  A slow or already-gone connection drops
    /// the event.
    pub fn emit(&self, event: ServerEvent) {
        if self.tx.try_send(event).is_err() {
            debug!(conn = %self.id, "dropping event for slow or closed connection");
        }
    }
}

/// One presence partition entry.  Invariant: `sockets` is never empty; the
/// entry is removed as a whole when its last connection goes away.
/// Duplicate ids are possible on reconnect races and are tolerated because
/// removal only ever takes out one occurrence.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub sockets: Vec<ConnectionId>,
    pub user: User,
}

/// Process-wide presence state.  Created at server start, torn down at
/// shutdown, injected into every component.
#[derive(Default)]
pub struct ChatState {
    /// Active partition, exact-case username keys.  `BTreeMap` keeps the
    /// lexicographic ordering the online-list payloads require.
    online: BTreeMap<String, PresenceEntry>,
    /// Idle partition, exact-case username keys.
    idle: BTreeMap<String, PresenceEntry>,
    /// Directory of every live connection, indexed by id.
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Connection directory
    // ------------------------------------------------------------------

    pub fn insert_connection(&mut self, handle: ConnectionHandle) {
        self.connections.insert(handle.id, handle);
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.connections.values()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Admit a connection into the active partition.
    ///
    /// Returns `true` when the registry changed (a presence broadcast is
    /// due).  An empty username is a no-op.  The existence check is
    /// case-insensitive while the stored key keeps the user's exact casing.
    pub fn admit(&mut self, user: &User, conn: ConnectionId) -> bool {
        if user.username.is_empty() {
            return false;
        }

        let existing = self
            .online
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&user.username))
            .cloned();

        match existing {
            Some(key) => {
                if let Some(entry) = self.online.get_mut(&key) {
                    entry.sockets.push(conn);
                }
            }
            None => {
                self.online.insert(
                    user.username.clone(),
                    PresenceEntry {
                        sockets: vec![conn],
                        user: user.clone(),
                    },
                );
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Idle / active toggle
    // ------------------------------------------------------------------

    /// Apply a client-reported presence transition.  Returns `true` when a
    /// presence broadcast is due.
    pub fn set_presence(&mut self, user: &User, conn: ConnectionId, state: PresenceState) -> bool {
        match state {
            PresenceState::Idle => {
                if user.username.is_empty() {
                    return false;
                }
                match self.idle.get_mut(&user.username) {
                    Some(entry) => entry.sockets.push(conn),
                    None => {
                        self.idle.insert(
                            user.username.clone(),
                            PresenceEntry {
                                sockets: vec![conn],
                                user: user.clone(),
                            },
                        );
                    }
                }
                true
            }
            // Going active clears the whole idle entry, however many idle
            // connections it accumulated.
            PresenceState::Active => self.idle.remove(&user.username).is_some(),
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Remove a disconnected connection from whichever partitions hold its
    /// username, and evict it from the directory.
    pub fn remove(&mut self, username: &str, conn: ConnectionId) {
        Self::remove_from_partition(&mut self.online, username, conn);
        Self::remove_from_partition(&mut self.idle, username, conn);
        self.connections.remove(&conn);
    }

    fn remove_from_partition(
        partition: &mut BTreeMap<String, PresenceEntry>,
        username: &str,
        conn: ConnectionId,
    ) {
        let Some(entry) = partition.get_mut(username) else {
            return;
        };
        if entry.sockets.len() < 2 {
            partition.remove(username);
        } else if let Some(pos) = entry.sockets.iter().position(|s| *s == conn) {
            // Only one occurrence: duplicates from reconnect races survive
            // until their own disconnect.
            entry.sockets.remove(pos);
        }
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    pub fn online_entry(&self, username: &str) -> Option<&PresenceEntry> {
        self.online.get(username)
    }

    /// Linear scan of the active partition by user id (typing relay).
    pub fn find_online_by_user_id(&self, id: UserId) -> Option<&User> {
        self.online.values().map(|e| &e.user).find(|u| u.id == id)
    }

    /// Cached records of everyone currently in the active partition, in
    /// username order.
    pub fn online_users(&self) -> Vec<User> {
        self.online.values().map(|e| e.user.clone()).collect()
    }

    /// Full sorted online map as sent to privileged connections.
    pub fn online_public(&self) -> BTreeMap<String, PublicUser> {
        self.online
            .iter()
            .map(|(k, e)| (k.clone(), e.user.public()))
            .collect()
    }

    /// Both partitions projected for the presence-bubble broadcast.
    pub fn bubbles(&self) -> OnlineBubbles {
        OnlineBubbles {
            sorted_user_list: self.online_public(),
            sorted_idle_list: self
                .idle
                .iter()
                .map(|(k, e)| (k.clone(), e.user.public()))
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_entry(&self, username: &str) -> Option<&PresenceEntry> {
        self.idle.get(username)
    }
}
