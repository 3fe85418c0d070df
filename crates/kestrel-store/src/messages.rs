//! CRUD operations for [`ChatMessage`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use kestrel_shared::types::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::ChatMessage;
use crate::users::{conversion_err, parse_uuid_col};

impl Database {
    /// Insert a new chat message and bump the conversation's `updated_at`.
    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_messages (id, conversation_id, owner_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.owner_id.to_string(),
                message.body,
                message.created_at.to_rfc3339(),
            ],
        )?;
        self.touch_conversation(message.conversation_id, message.created_at)?;
        Ok(())
    }

    /// The most recent message of a conversation, if any.
    pub fn get_most_recent_message(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, owner_id, body, created_at
             FROM chat_messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC
             LIMIT 1",
        )?;

        let mut rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

/// Map a `rusqlite::Row` to a [`ChatMessage`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id_str: String = row.get(0)?;
    let convo_str: String = row.get(1)?;
    let owner_str: String = row.get(2)?;
    let body: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(4, e))?;

    Ok(ChatMessage {
        id: MessageId(parse_uuid_col(0, &id_str)?),
        conversation_id: ConversationId(parse_uuid_col(1, &convo_str)?),
        owner_id: UserId(parse_uuid_col(2, &owner_str)?),
        body,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::sample_user;

    #[test]
    fn test_most_recent_message() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user("alice");
        let bob = sample_user("bob");
        db.create_user(&alice).unwrap();
        db.create_user(&bob).unwrap();

        let convo = ConversationId::new();
        let t0 = Utc::now() - chrono::Duration::minutes(5);
        db.create_conversation(convo, &[alice.id, bob.id], t0).unwrap();

        assert!(db.get_most_recent_message(convo).unwrap().is_none());

        let first = ChatMessage {
            id: MessageId::new(),
            conversation_id: convo,
            owner_id: alice.id,
            body: "hello".to_string(),
            created_at: t0,
        };
        let second = ChatMessage {
            id: MessageId::new(),
            conversation_id: convo,
            owner_id: bob.id,
            body: "hi there".to_string(),
            created_at: Utc::now(),
        };
        db.insert_message(&first).unwrap();
        db.insert_message(&second).unwrap();

        let recent = db.get_most_recent_message(convo).unwrap().unwrap();
        assert_eq!(recent.id, second.id);
        assert_eq!(recent.body, "hi there");

        // Inserting a message advances the conversation timestamp.
        let convo_row = db.get_conversation(convo).unwrap();
        assert_eq!(
            convo_row.updated_at.timestamp(),
            second.created_at.timestamp()
        );
    }
}
