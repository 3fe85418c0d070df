//! Per-connection lifecycle: WebSocket upgrade, inbound event dispatch,
//! and teardown.
//!
//! Each connection runs two tasks: a reader that parses [`ClientEvent`]
//! frames and dispatches them, and a writer that drains the connection's
//! outbound queue into the socket.  Handlers run to completion one at a
//! time per connection; only their store calls can interleave with other
//! connections' handlers.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::warn;

use kestrel_shared::protocol::ClientEvent;
use kestrel_shared::types::{ConnectionId, UserId};
use kestrel_store::{StoreError, User};

use crate::api::AppState;
use crate::error::ServerError;
use crate::server::ChatServer;
use crate::state::ConnectionHandle;
use crate::{conversations, relay, visibility};

#[derive(Deserialize)]
pub struct WsQuery {
    /// Resolved identity of the connecting client.  Authentication itself
    /// is the session middleware's job upstream of this core; by the time
    /// a connection reaches `/ws` its identity is settled.
    pub user: UserId,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user = match state.server.db().get_user(query.user) {
        Ok(user) if !user.deleted => user,
        Ok(_) | Err(StoreError::NotFound) => return Err(ServerError::Unauthorized),
        Err(e) => return Err(ServerError::Store(e)),
    };

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state.server, user)))
}

async fn handle_connection(socket: WebSocket, server: ChatServer, user: User) {
    let (mut sink, mut stream) = socket.split();
    let conn = ConnectionId::new();
    let (handle, mut rx) = ConnectionHandle::new(conn, user.clone());

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode outbound event"),
            }
        }
    });

    server.join(handle).await;

    let mut reason = "client namespace disconnect";
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientEvent::from_json(&text) {
                Ok(event) => handle_event(&server, conn, &user, event).await,
                Err(e) => {
                    warn!(user = %user.username, error = %e, "malformed client event");
                }
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            Ok(_) => {}
            Err(_) => {
                reason = "transport error";
                break;
            }
        }
    }

    writer.abort();
    server.disconnect(conn, &user, reason).await;
}

/// Route one inbound event to its handler.
pub async fn handle_event(
    server: &ChatServer,
    conn: ConnectionId,
    user: &User,
    event: ClientEvent,
) {
    match event {
        ClientEvent::OnlineStatusSet { state } => {
            server.set_user_online_status(user, conn, state).await;
        }
        ClientEvent::UpdateUsers => visibility::update_users(server).await,
        ClientEvent::UpdateOnlineBubbles => server.update_online_bubbles().await,
        ClientEvent::UpdateConversationsNotifications => {
            conversations::update_conversations_notifications(server, conn, user).await;
        }
        ClientEvent::SpawnChatWindow { user_id } => {
            conversations::spawn_chat_window(server, conn, user_id).await;
        }
        ClientEvent::GetOpenChatWindows => {
            conversations::spawn_open_chat_windows(server, conn, user).await;
        }
        ClientEvent::ChatSend(request) => relay::chat_send(server, conn, request).await,
        ClientEvent::ChatTyping { to, from } => relay::chat_typing(server, to, from).await,
        ClientEvent::ChatStopTyping { to } => relay::chat_stop_typing(server, to).await,
        ClientEvent::SaveChatWindow {
            user_id,
            convo_id,
            remove,
        } => {
            conversations::save_chat_window(server, user_id, convo_id, remove).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_user;
    use crate::test_util::TestServer;
    use kestrel_shared::protocol::{PresenceState, ServerEvent};

    #[tokio::test]
    async fn test_idle_toggle_broadcasts_bubbles() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let (conn, mut rx) = ts.connect(&alice).await;
        ts.drain(&mut rx);

        handle_event(
            &ts.server,
            conn,
            &alice,
            ClientEvent::OnlineStatusSet {
                state: PresenceState::Idle,
            },
        )
        .await;

        let bubbles = ts
            .drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::UpdateOnlineBubbles(b) => Some(b),
                _ => None,
            })
            .unwrap();
        assert!(bubbles.sorted_idle_list.contains_key("alice"));

        handle_event(
            &ts.server,
            conn,
            &alice,
            ClientEvent::OnlineStatusSet {
                state: PresenceState::Active,
            },
        )
        .await;
        assert!(ts
            .server
            .state()
            .read()
            .await
            .bubbles()
            .sorted_idle_list
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_users_event_emits_map() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let (conn, mut rx) = ts.connect(&alice).await;
        ts.drain(&mut rx);

        handle_event(&ts.server, conn, &alice, ClientEvent::UpdateUsers).await;
        assert!(ts.last_update_users(&mut rx).is_some());
    }
}
