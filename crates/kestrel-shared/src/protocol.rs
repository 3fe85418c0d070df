//! WebSocket wire protocol.
//!
//! Every frame is a JSON object of the form `{"event": "...", "data": ...}`.
//! [`ClientEvent`] covers everything a client may send, [`ServerEvent`]
//! everything the server emits. User records only ever cross the wire as
//! [`PublicUser`], the explicit safe projection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, UserId};

/// Safe projection of an account record.
///
/// This is the *only* user shape that is ever serialized onto a connection.
/// Secret fields (password hash, reset-password hash/expiry, access token,
/// device tokens, soft-delete flag) simply do not exist here, so they cannot
/// leak by omission at any call site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub fullname: String,
    pub image: Option<String>,
    pub title: Option<String>,
    pub last_online: Option<DateTime<Utc>>,
}

/// Client-reported presence state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Idle,
    Active,
}

/// A chat message as submitted by a client.
///
/// Deserializing the owner into [`PublicUser`] drops any extra fields the
/// client may have attached, so a forged owner object cannot smuggle data
/// through the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub owner: PublicUser,
    pub body: String,
}

/// All client-initiated events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Idle/active toggle from the client's activity tracker.
    OnlineStatusSet { state: PresenceState },
    /// Ask for a fresh (possibly group-filtered) online-user list.
    UpdateUsers,
    /// Ask for a fresh presence-bubble broadcast.
    UpdateOnlineBubbles,
    /// Ask for the conversation-notification batch.
    UpdateConversationsNotifications,
    /// Open a chat window against a specific user.
    #[serde(rename_all = "camelCase")]
    SpawnChatWindow { user_id: UserId },
    /// Re-open all chat windows saved in the user's preferences.
    GetOpenChatWindows,
    /// Send a chat message to another user.
    ChatSend(ChatSendRequest),
    /// The sender started typing in a conversation with `to`.
    ChatTyping { to: UserId, from: UserId },
    /// The sender stopped typing.
    ChatStopTyping { to: UserId },
    /// Persist (or remove) an open chat window in the user's preferences.
    #[serde(rename_all = "camelCase")]
    SaveChatWindow {
        user_id: UserId,
        convo_id: ConversationId,
        remove: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendRequest {
    pub to: UserId,
    pub from: UserId,
    pub message: OutgoingMessage,
}

/// A relayed chat message, delivered identically to both parties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub to: UserId,
    pub from: UserId,
    pub message: OutgoingMessage,
    pub to_user: PublicUser,
    pub from_user: PublicUser,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub to: UserId,
    pub from: UserId,
    pub to_user: PublicUser,
    pub from_user: PublicUser,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingPayload {
    pub to: UserId,
    pub to_user: PublicUser,
}

/// Both presence partitions, keyed by username in lexicographic order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineBubbles {
    pub sorted_user_list: BTreeMap<String, PublicUser>,
    pub sorted_idle_list: BTreeMap<String, PublicUser>,
}

/// One entry of the conversation-notification batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationNotification {
    pub id: ConversationId,
    pub participants: Vec<PublicUser>,
    /// The participant who is not the requester, when resolvable.
    pub partner: Option<PublicUser>,
    /// Preview line: `"<partner>: <body>"`, `"You: <body>"` or
    /// `"New Conversation"`.
    pub recent_message: String,
    pub updated_at: DateTime<Utc>,
}

/// All server-initiated events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Admission into the presence registry succeeded.
    JoinSuccessfully,
    /// Full or group-filtered online-user map for one connection.
    UpdateUsers(BTreeMap<String, PublicUser>),
    /// Presence-bubble broadcast to every connection.
    UpdateOnlineBubbles(OnlineBubbles),
    /// Conversation-notification batch for one connection.
    UpdateConversationsNotifications {
        conversations: Vec<ConversationNotification>,
    },
    /// Instruct the requesting client to open a chat window.
    SpawnChatWindow(PublicUser),
    ChatMessageReceive(ChatMessagePayload),
    /// Self-directed delivery failure notice (recipient/sender unresolvable).
    ChatMessageError { message: String },
    ChatUserTyping(TypingPayload),
    ChatUserStopTyping(StopTypingPayload),
}

impl ClientEvent {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> PublicUser {
        PublicUser {
            id: UserId::new(),
            email: "alice@example.com".into(),
            username: "alice".into(),
            fullname: "Alice Smith".into(),
            image: None,
            title: Some("Support Agent".into()),
            last_online: None,
        }
    }

    #[test]
    fn test_client_event_tagged_format() {
        let evt = ClientEvent::from_json(r#"{"event":"onlineStatusSet","data":{"state":"idle"}}"#)
            .unwrap();
        assert_eq!(
            evt,
            ClientEvent::OnlineStatusSet {
                state: PresenceState::Idle
            }
        );
    }

    #[test]
    fn test_client_event_no_payload() {
        let evt = ClientEvent::from_json(r#"{"event":"getOpenChatWindows"}"#).unwrap();
        assert_eq!(evt, ClientEvent::GetOpenChatWindows);
    }

    #[test]
    fn test_owner_extra_fields_are_dropped() {
        let id = UserId::new();
        let raw = format!(
            r#"{{"owner":{{"id":"{}","email":"a@b.c","username":"a","fullname":"A",
                "image":null,"title":null,"lastOnline":null,
                "passwordHash":"leak-me"}},"body":"hi"}}"#,
            id
        );
        let msg: OutgoingMessage = serde_json::from_str(&raw).unwrap();
        let back = serde_json::to_string(&msg).unwrap();
        assert!(!back.contains("passwordHash"));
        assert!(!back.contains("leak-me"));
    }

    #[test]
    fn test_server_event_roundtrip() {
        let evt = ServerEvent::SpawnChatWindow(sample_user());
        let json = evt.to_json().unwrap();
        assert!(json.contains(r#""event":"spawnChatWindow""#));
        let restored: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(evt, restored);
    }
}
