//! CRUD operations for [`Conversation`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use kestrel_shared::types::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Conversation, ConversationMeta};
use crate::users::{parse_ts_col, parse_uuid_col, row_to_user, USER_COLUMNS};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new conversation between `participants`.
    pub fn create_conversation(
        &self,
        id: ConversationId,
        participants: &[UserId],
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations (id, updated_at) VALUES (?1, ?2)",
            params![id.to_string(), updated_at.to_rfc3339()],
        )?;
        for user_id in participants {
            self.conn().execute(
                "INSERT INTO conversation_participants (conversation_id, user_id)
                 VALUES (?1, ?2)",
                params![id.to_string(), user_id.to_string()],
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation with hydrated participants.
    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let updated_at_str: String = self
            .conn()
            .query_row(
                "SELECT updated_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))?;

        self.hydrate_conversation(id, updated_at)
    }

    /// The `limit` most recently updated conversations the user participates
    /// in, newest first.
    pub fn get_conversations_with_limit(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.updated_at
             FROM conversations c
             JOIN conversation_participants cp ON cp.conversation_id = c.id
             WHERE cp.user_id = ?1
             ORDER BY c.updated_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![user_id.to_string(), limit], |row| {
            let id_str: String = row.get(0)?;
            let updated_str: String = row.get(1)?;
            Ok((parse_uuid_col(0, &id_str)?, updated_str))
        })?;

        let mut headers = Vec::new();
        for row in rows {
            headers.push(row?);
        }

        let mut conversations = Vec::new();
        for (id, updated_str) in headers {
            let updated_at = DateTime::parse_from_rfc3339(&updated_str)
                .map(|dt| dt.with_timezone(&Utc))?;
            conversations.push(self.hydrate_conversation(ConversationId(id), updated_at)?);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record a per-user soft delete of the conversation.
    pub fn set_conversation_deleted_at(
        &self,
        id: ConversationId,
        user_id: UserId,
        deleted_at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversation_participants SET deleted_at = ?3
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.to_string(), deleted_at.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Bump the conversation's `updated_at` (new message activity).
    pub fn touch_conversation(&self, id: ConversationId, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn hydrate_conversation(
        &self,
        id: ConversationId,
        updated_at: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM users
             JOIN conversation_participants cp ON cp.user_id = users.id
             WHERE cp.conversation_id = ?1
             ORDER BY users.username ASC",
            USER_COLUMNS
        ))?;

        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;
        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }

        let mut meta_stmt = self.conn().prepare(
            "SELECT user_id, deleted_at FROM conversation_participants
             WHERE conversation_id = ?1",
        )?;
        let meta_rows = meta_stmt.query_map(params![id.to_string()], |row| {
            let user_str: String = row.get(0)?;
            let deleted_str: Option<String> = row.get(1)?;
            Ok(ConversationMeta {
                user_id: UserId(parse_uuid_col(0, &user_str)?),
                deleted_at: parse_ts_col(1, deleted_str)?,
            })
        })?;

        let mut user_meta = Vec::new();
        for row in meta_rows {
            user_meta.push(row?);
        }

        Ok(Conversation {
            id,
            participants,
            user_meta,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::sample_user;

    #[test]
    fn test_conversation_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user("alice");
        let bob = sample_user("bob");
        db.create_user(&alice).unwrap();
        db.create_user(&bob).unwrap();

        let id = ConversationId::new();
        db.create_conversation(id, &[alice.id, bob.id], Utc::now())
            .unwrap();

        let convo = db.get_conversation(id).unwrap();
        assert_eq!(convo.participants.len(), 2);
        assert_eq!(convo.user_meta.len(), 2);
        assert!(convo.user_meta.iter().all(|m| m.deleted_at.is_none()));
    }

    #[test]
    fn test_conversations_with_limit_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user("alice");
        let bob = sample_user("bob");
        let carol = sample_user("carol");
        db.create_user(&alice).unwrap();
        db.create_user(&bob).unwrap();
        db.create_user(&carol).unwrap();

        let older = ConversationId::new();
        let newer = ConversationId::new();
        let t0 = Utc::now() - chrono::Duration::hours(2);
        let t1 = Utc::now();
        db.create_conversation(older, &[alice.id, bob.id], t0).unwrap();
        db.create_conversation(newer, &[alice.id, carol.id], t1).unwrap();

        let convos = db.get_conversations_with_limit(alice.id, 10).unwrap();
        assert_eq!(convos.len(), 2);
        assert_eq!(convos[0].id, newer);
        assert_eq!(convos[1].id, older);

        let limited = db.get_conversations_with_limit(alice.id, 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, newer);

        // Bob only participates in one.
        assert_eq!(db.get_conversations_with_limit(bob.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_soft_delete_marker() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user("alice");
        let bob = sample_user("bob");
        db.create_user(&alice).unwrap();
        db.create_user(&bob).unwrap();

        let id = ConversationId::new();
        db.create_conversation(id, &[alice.id, bob.id], Utc::now())
            .unwrap();

        let at = Utc::now();
        db.set_conversation_deleted_at(id, alice.id, at).unwrap();

        let convo = db.get_conversation(id).unwrap();
        let meta = convo.meta_for(alice.id).unwrap();
        assert_eq!(meta.deleted_at.map(|t| t.timestamp()), Some(at.timestamp()));
        assert!(convo.meta_for(bob.id).unwrap().deleted_at.is_none());
    }
}
