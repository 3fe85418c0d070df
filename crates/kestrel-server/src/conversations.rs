//! Conversation notification pipeline and chat-window persistence.
//!
//! The pipeline is deliberately sequential per conversation: it bounds the
//! load on the store and keeps partner resolution deterministic.  A failed
//! message lookup aborts the whole batch so the client never sees a partial
//! notification list.

use tracing::warn;

use kestrel_shared::protocol::{ConversationNotification, ServerEvent};
use kestrel_shared::types::{ConnectionId, ConversationId, UserId};
use kestrel_store::{Conversation, StoreError, User};

use crate::server::ChatServer;

/// Build and emit the conversation-notification batch for one connection.
pub async fn update_conversations_notifications(
    server: &ChatServer,
    conn: ConnectionId,
    user: &User,
) {
    let limit = server.config().conversation_limit;
    let conversations = match server.db().get_conversations_with_limit(user.id, limit) {
        Ok(conversations) => conversations,
        Err(e) => {
            warn!(user = %user.username, error = %e, "conversation load failed");
            return;
        }
    };

    let mut batch = Vec::new();
    for convo in conversations {
        // Soft-deleted since the last activity: must not be surfaced.
        if is_deleted_for(&convo, user.id) {
            continue;
        }

        let recent = match server.db().get_most_recent_message(convo.id) {
            Ok(recent) => recent,
            Err(e) => {
                // Fail closed: a partial batch would be worse than none.
                warn!(
                    user = %user.username,
                    convo = %convo.id,
                    error = %e,
                    "recent-message lookup failed, aborting notification batch"
                );
                return;
            }
        };

        let partner = convo.partner_of(user.id).map(User::public);

        let recent_message = match &recent {
            Some(message) => {
                let Some(partner) = &partner else {
                    // A message without a resolvable partner: skip the
                    // conversation rather than mislabel the preview.
                    continue;
                };
                if message.owner_id == partner.id {
                    format!("{}: {}", partner.fullname, message.body)
                } else {
                    format!("You: {}", message.body)
                }
            }
            None => "New Conversation".to_string(),
        };

        batch.push(ConversationNotification {
            id: convo.id,
            participants: convo.participants.iter().map(User::public).collect(),
            partner,
            recent_message,
            updated_at: convo.updated_at,
        });
    }

    server
        .send_to_self(
            conn,
            ServerEvent::UpdateConversationsNotifications {
                conversations: batch,
            },
        )
        .await;
}

fn is_deleted_for(convo: &Conversation, user_id: UserId) -> bool {
    convo
        .meta_for(user_id)
        .and_then(|meta| meta.deleted_at)
        .map(|deleted_at| deleted_at > convo.updated_at)
        .unwrap_or(false)
}

/// Re-open every chat window the user saved in their preferences.
pub async fn spawn_open_chat_windows(server: &ChatServer, conn: ConnectionId, user: &User) {
    // Reload the account: the cached presence record may predate the latest
    // preference save.
    let user = match server.db().get_user(user.id) {
        Ok(user) => user,
        Err(StoreError::NotFound) => return,
        Err(e) => {
            warn!(user = %user.username, error = %e, "account reload failed");
            return;
        }
    };

    for convo_id in &user.open_chat_windows {
        let convo = match server.db().get_conversation(*convo_id) {
            Ok(convo) => convo,
            // A saved window pointing at a gone conversation is stale
            // preference data, not an error.
            Err(_) => continue,
        };
        let Some(partner) = convo.partner_of(user.id) else {
            continue;
        };
        server
            .send_to_self(conn, ServerEvent::SpawnChatWindow(partner.public()))
            .await;
    }
}

/// Open a chat window against a specific user.  Unknown ids are silently
/// ignored; the requesting client simply gets no window.
pub async fn spawn_chat_window(server: &ChatServer, conn: ConnectionId, user_id: UserId) {
    // Bind before matching so the database guard drops ahead of the await.
    let target = server.db().get_user(user_id);
    match target {
        Ok(target) => {
            server
                .send_to_self(conn, ServerEvent::SpawnChatWindow(target.public()))
                .await;
        }
        Err(StoreError::NotFound) => {}
        Err(e) => warn!(target = %user_id, error = %e, "chat-window target lookup failed"),
    }
}

/// Persist (or remove) an open chat window in the user's preferences.
pub async fn save_chat_window(
    server: &ChatServer,
    user_id: UserId,
    convo_id: ConversationId,
    remove: bool,
) {
    let result = if remove {
        server.db().remove_open_chat_window(user_id, convo_id)
    } else {
        server.db().add_open_chat_window(user_id, convo_id)
    };
    match result {
        Ok(()) | Err(StoreError::NotFound) => {}
        Err(e) => warn!(user = %user_id, error = %e, "chat-window save failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_user;
    use crate::test_util::TestServer;
    use chrono::{Duration, Utc};
    use kestrel_shared::types::MessageId;
    use kestrel_store::ChatMessage;

    fn message(convo: ConversationId, owner: UserId, body: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::new(),
            conversation_id: convo,
            owner_id: owner,
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_preview_strings() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let bob = ts.persist_user(test_user("bob"));
        let carol = ts.persist_user(test_user("carol"));

        // bob spoke last -> partner-labelled preview.
        let with_bob = ConversationId::new();
        // alice spoke last -> "You:" preview.
        let with_carol = ConversationId::new();
        // nobody spoke -> "New Conversation".
        let empty = ConversationId::new();
        {
            let db = ts.server.db();
            let t = Utc::now() - Duration::hours(1);
            db.create_conversation(with_bob, &[alice.id, bob.id], t).unwrap();
            db.create_conversation(with_carol, &[alice.id, carol.id], t).unwrap();
            db.create_conversation(empty, &[alice.id, bob.id], t).unwrap();
            db.insert_message(&message(with_bob, bob.id, "hi")).unwrap();
            db.insert_message(&message(with_carol, alice.id, "hello")).unwrap();
        }

        let (conn, mut rx) = ts.connect(&alice).await;
        ts.drain(&mut rx);

        update_conversations_notifications(&ts.server, conn, &alice).await;

        let batch = ts.last_conversations(&mut rx).unwrap();
        assert_eq!(batch.len(), 3);

        let find = |id| batch.iter().find(|c| c.id == id).unwrap();
        assert_eq!(find(with_bob).recent_message, "bob Fullname: hi");
        assert_eq!(find(with_carol).recent_message, "You: hello");
        assert_eq!(find(empty).recent_message, "New Conversation");
        assert_eq!(
            find(with_bob).partner.as_ref().map(|p| p.id),
            Some(bob.id)
        );
    }

    #[tokio::test]
    async fn test_soft_deleted_conversation_is_skipped() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let bob = ts.persist_user(test_user("bob"));

        let deleted = ConversationId::new();
        let kept = ConversationId::new();
        {
            let db = ts.server.db();
            let updated = Utc::now() - Duration::hours(1);
            db.create_conversation(deleted, &[alice.id, bob.id], updated).unwrap();
            db.create_conversation(kept, &[alice.id, bob.id], updated).unwrap();
            // Deleted after the last activity: excluded for alice.
            db.set_conversation_deleted_at(deleted, alice.id, Utc::now())
                .unwrap();
            // Deleted before the last activity: still included.
            db.set_conversation_deleted_at(kept, alice.id, updated - Duration::hours(1))
                .unwrap();
        }

        let (conn, mut rx) = ts.connect(&alice).await;
        ts.drain(&mut rx);
        update_conversations_notifications(&ts.server, conn, &alice).await;

        let batch = ts.last_conversations(&mut rx).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, kept);

        // For bob nothing was deleted.
        let (bob_conn, mut bob_rx) = ts.connect(&bob).await;
        ts.drain(&mut bob_rx);
        update_conversations_notifications(&ts.server, bob_conn, &bob).await;
        assert_eq!(ts.last_conversations(&mut bob_rx).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_spawn_chat_window_emits_target_and_stays_send() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let bob = ts.persist_user(test_user("bob"));
        let (conn, mut rx) = ts.connect(&alice).await;
        ts.drain(&mut rx);

        // The session task runs on a multi-threaded runtime, so every
        // handler future must be Send (no database guard held across an
        // await).
        fn require_send<F: std::future::Future + Send>(fut: F) -> F {
            fut
        }
        require_send(spawn_chat_window(&ts.server, conn, bob.id)).await;

        let events = ts.drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::SpawnChatWindow(target) if target.id == bob.id
        )));
    }

    #[tokio::test]
    async fn test_spawn_chat_window_unknown_user_is_silent() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let (conn, mut rx) = ts.connect(&alice).await;
        ts.drain(&mut rx);

        spawn_chat_window(&ts.server, conn, UserId::new()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_saved_windows_spawn_on_join() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let bob = ts.persist_user(test_user("bob"));

        let convo = ConversationId::new();
        {
            let db = ts.server.db();
            db.create_conversation(convo, &[alice.id, bob.id], Utc::now()).unwrap();
        }
        save_chat_window(&ts.server, alice.id, convo, false).await;

        let (_conn, mut rx) = ts.connect(&alice).await;
        let events = ts.drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::SpawnChatWindow(partner) if partner.id == bob.id
        )));
    }
}
