//! Chat message and typing-indicator relay.
//!
//! The relay never touches message persistence; by the time `chatSend`
//! arrives the message is assumed stored.  Its job is validation,
//! projection, and fan-out to both parties' live connections.

use kestrel_shared::protocol::{
    ChatMessagePayload, ChatSendRequest, ServerEvent, StopTypingPayload, TypingPayload,
};
use kestrel_shared::types::{ConnectionId, UserId};
use kestrel_store::StoreError;

use crate::server::ChatServer;

/// Relay a chat message to recipient and sender.
///
/// Both account lookups are independent; if either fails or finds nothing,
/// the only effect is a single self-directed error event — no partial
/// relay ever happens.
pub async fn chat_send(server: &ChatServer, conn: ConnectionId, request: ChatSendRequest) {
    // The owner embedded in the request was already re-stripped to the
    // public projection during deserialization.
    let (to_result, from_result) = {
        let db = server.db();
        (db.get_user(request.to), db.get_user(request.from))
    };

    let (to_user, from_user) = match (to_result, from_result) {
        (Ok(to_user), Ok(from_user)) => (to_user, from_user),
        (Err(e), _) | (_, Err(e)) => {
            let message = match e {
                StoreError::NotFound => "User Not Found".to_string(),
                other => other.to_string(),
            };
            server
                .send_to_self(conn, ServerEvent::ChatMessageError { message })
                .await;
            return;
        }
    };

    let payload = ChatMessagePayload {
        to: request.to,
        from: request.from,
        message: request.message,
        to_user: to_user.public(),
        from_user: from_user.public(),
    };

    server
        .send_to_user(
            &to_user.username,
            ServerEvent::ChatMessageReceive(payload.clone()),
        )
        .await;
    server
        .send_to_user(
            &from_user.username,
            ServerEvent::ChatMessageReceive(payload),
        )
        .await;
}

/// Relay a typing indicator to the recipient.
///
/// Both parties are resolved against the active partition only; if either
/// is not online the event is dropped without a trace.
pub async fn chat_typing(server: &ChatServer, to: UserId, from: UserId) {
    let (to_user, from_user) = {
        let state = server.state().read().await;
        (
            state.find_online_by_user_id(to).cloned(),
            state.find_online_by_user_id(from).cloned(),
        )
    };

    let (Some(to_user), Some(from_user)) = (to_user, from_user) else {
        return;
    };

    let payload = TypingPayload {
        to,
        from,
        to_user: to_user.public(),
        from_user: from_user.public(),
    };
    server
        .send_to_user(&to_user.username, ServerEvent::ChatUserTyping(payload))
        .await;
}

/// Relay a stop-typing indicator to the recipient.
pub async fn chat_stop_typing(server: &ChatServer, to: UserId) {
    let to_user = {
        let state = server.state().read().await;
        state.find_online_by_user_id(to).cloned()
    };

    let Some(to_user) = to_user else {
        return;
    };

    let payload = StopTypingPayload {
        to,
        to_user: to_user.public(),
    };
    server
        .send_to_user(&to_user.username, ServerEvent::ChatUserStopTyping(payload))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_user;
    use crate::test_util::TestServer;
    use kestrel_shared::protocol::OutgoingMessage;

    fn send_request(to: &kestrel_store::User, from: &kestrel_store::User) -> ChatSendRequest {
        ChatSendRequest {
            to: to.id,
            from: from.id,
            message: OutgoingMessage {
                owner: from.public(),
                body: "hello there".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_chat_send_reaches_both_parties() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let bob = ts.persist_user(test_user("bob"));

        let (alice_conn, mut alice_rx) = ts.connect(&alice).await;
        let (_bob_conn, mut bob_rx) = ts.connect(&bob).await;
        ts.drain(&mut alice_rx);
        ts.drain(&mut bob_rx);

        chat_send(&ts.server, alice_conn, send_request(&bob, &alice)).await;

        let to_bob = ts.drain(&mut bob_rx);
        let to_alice = ts.drain(&mut alice_rx);

        for events in [&to_bob, &to_alice] {
            assert_eq!(events.len(), 1);
            let ServerEvent::ChatMessageReceive(payload) = &events[0] else {
                panic!("expected ChatMessageReceive, got {:?}", events[0]);
            };
            assert_eq!(payload.message.body, "hello there");
            assert_eq!(payload.to_user.id, bob.id);
            assert_eq!(payload.from_user.id, alice.id);
        }
    }

    #[tokio::test]
    async fn test_chat_send_unknown_recipient_errors_to_sender_only() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let ghost = test_user("ghost"); // never persisted

        let (alice_conn, mut alice_rx) = ts.connect(&alice).await;
        let (_ghost_conn, mut ghost_rx) = ts.connect(&ghost).await;
        ts.drain(&mut alice_rx);
        ts.drain(&mut ghost_rx);

        chat_send(&ts.server, alice_conn, send_request(&ghost, &alice)).await;

        let to_alice = ts.drain(&mut alice_rx);
        assert_eq!(to_alice.len(), 1);
        assert!(matches!(
            &to_alice[0],
            ServerEvent::ChatMessageError { message } if message == "User Not Found"
        ));
        assert!(ts.drain(&mut ghost_rx).is_empty());
    }

    #[tokio::test]
    async fn test_typing_requires_both_parties_online() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let bob = ts.persist_user(test_user("bob"));

        let (_alice_conn, mut alice_rx) = ts.connect(&alice).await;
        ts.drain(&mut alice_rx);

        // bob is offline: nothing is emitted anywhere.
        chat_typing(&ts.server, bob.id, alice.id).await;
        assert!(ts.drain(&mut alice_rx).is_empty());

        let (_bob_conn, mut bob_rx) = ts.connect(&bob).await;
        ts.drain(&mut alice_rx);
        ts.drain(&mut bob_rx);

        chat_typing(&ts.server, bob.id, alice.id).await;
        let events = ts.drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        let ServerEvent::ChatUserTyping(payload) = &events[0] else {
            panic!("expected ChatUserTyping, got {:?}", events[0]);
        };
        assert_eq!(payload.from_user.id, alice.id);
        // The sender gets nothing back.
        assert!(ts.drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_stop_typing_offline_recipient_is_dropped() {
        let ts = TestServer::new();
        let alice = ts.persist_user(test_user("alice"));
        let (_conn, mut rx) = ts.connect(&alice).await;
        ts.drain(&mut rx);

        chat_stop_typing(&ts.server, UserId::new()).await;
        assert!(ts.drain(&mut rx).is_empty());
    }
}
