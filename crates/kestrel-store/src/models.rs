//! Domain model structs persisted in the SQLite database.
//!
//! [`User`] is the *full* account record, secret fields included.  It must
//! never be serialized onto a connection directly; every wire boundary goes
//! through [`User::public`] instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_shared::protocol::PublicUser;
use kestrel_shared::types::{ConversationId, GroupId, MessageId, Role, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A full account record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Unique login name.  Presence registry keys are derived from this.
    pub username: String,
    pub fullname: String,
    pub email: String,
    pub title: Option<String>,
    /// Avatar image reference.
    pub image: Option<String>,
    pub role: Role,
    // -- Secret fields: never cross the wire --
    pub password_hash: String,
    pub reset_pass_hash: Option<String>,
    pub reset_pass_expire: Option<DateTime<Utc>>,
    pub access_token: Option<String>,
    pub device_tokens: Vec<String>,
    /// Soft-delete flag.
    pub deleted: bool,
    // -- Preferences / bookkeeping --
    pub last_online: Option<DateTime<Utc>>,
    /// Conversations the user keeps open as chat windows.
    pub open_chat_windows: Vec<ConversationId>,
}

impl User {
    /// The safe projection sent over the wire.  Constructing it here, and
    /// only here, is what guarantees secret fields can never leak.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
            fullname: self.fullname.clone(),
            image: self.image.clone(),
            title: self.title.clone(),
            last_online: self.last_online,
        }
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A customer group.  Membership is owned by the account subsystem; the
/// real-time core only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    /// Unique group name.
    pub name: String,
    /// Hydrated member records.
    pub members: Vec<User>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Per-participant conversation metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMeta {
    pub user_id: UserId,
    /// When set and newer than the conversation's `updated_at`, the
    /// conversation is considered deleted for this participant.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A two-party chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    /// Hydrated participant records.
    pub participants: Vec<User>,
    pub user_meta: Vec<ConversationMeta>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// The per-user metadata entry for `user_id`, if present.
    pub fn meta_for(&self, user_id: UserId) -> Option<&ConversationMeta> {
        self.user_meta.iter().find(|m| m.user_id == user_id)
    }

    /// The participant who is not `user_id`.
    pub fn partner_of(&self, user_id: UserId) -> Option<&User> {
        self.participants.iter().find(|p| p.id != user_id)
    }
}

// ---------------------------------------------------------------------------
// Chat message
// ---------------------------------------------------------------------------

/// A single persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// The author's user id.
    pub owner_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_user(username: &str) -> User {
        User {
            id: UserId::new(),
            username: username.to_string(),
            fullname: format!("{} Fullname", username),
            email: format!("{}@example.com", username),
            title: None,
            image: None,
            role: Role::default(),
            password_hash: "argon2id$stub".to_string(),
            reset_pass_hash: Some("reset-hash".to_string()),
            reset_pass_expire: None,
            access_token: Some("secret-token".to_string()),
            device_tokens: vec!["device-1".to_string()],
            deleted: false,
            last_online: None,
            open_chat_windows: Vec::new(),
        }
    }

    #[test]
    fn test_public_projection_omits_secrets() {
        let user = sample_user("alice");
        let public = user.public();
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("reset-hash"));
        assert!(!json.contains("secret-token"));
        assert!(!json.contains("device-1"));
        assert!(!json.contains("deleted"));
        assert_eq!(public.username, "alice");
    }

    #[test]
    fn test_partner_resolution() {
        let alice = sample_user("alice");
        let bob = sample_user("bob");
        let convo = Conversation {
            id: ConversationId::new(),
            participants: vec![alice.clone(), bob.clone()],
            user_meta: Vec::new(),
            updated_at: Utc::now(),
        };
        assert_eq!(convo.partner_of(alice.id).map(|u| u.id), Some(bob.id));
        assert_eq!(convo.partner_of(bob.id).map(|u| u.id), Some(alice.id));
    }
}
