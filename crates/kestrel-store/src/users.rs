//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use kestrel_shared::types::{ConversationId, Role, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new account record.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, fullname, email, title, image,
                                is_admin, is_agent, password_hash, reset_pass_hash,
                                reset_pass_expire, access_token, device_tokens,
                                deleted, last_online, open_chat_windows)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                user.id.to_string(),
                user.username,
                user.fullname,
                user.email,
                user.title,
                user.image,
                user.role.is_admin,
                user.role.is_agent,
                user.password_hash,
                user.reset_pass_hash,
                user.reset_pass_expire.map(|t| t.to_rfc3339()),
                user.access_token,
                serde_json::to_string(&user.device_tokens)?,
                user.deleted,
                user.last_online.map(|t| t.to_rfc3339()),
                serde_json::to_string(&user.open_chat_windows)?,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single account by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Fetch a single account by exact username.
    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record the time the user was last seen online.
    pub fn set_last_online(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET last_online = ?2 WHERE id = ?1",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Add a conversation to the user's saved open chat windows.
    /// Adding an already-saved window is a no-op.
    pub fn add_open_chat_window(&self, id: UserId, convo_id: ConversationId) -> Result<()> {
        let user = self.get_user(id)?;
        let mut windows = user.open_chat_windows;
        if !windows.contains(&convo_id) {
            windows.push(convo_id);
        }
        self.save_open_chat_windows(id, &windows)
    }

    /// Remove a conversation from the user's saved open chat windows.
    pub fn remove_open_chat_window(&self, id: UserId, convo_id: ConversationId) -> Result<()> {
        let user = self.get_user(id)?;
        let windows: Vec<ConversationId> = user
            .open_chat_windows
            .into_iter()
            .filter(|c| *c != convo_id)
            .collect();
        self.save_open_chat_windows(id, &windows)
    }

    fn save_open_chat_windows(&self, id: UserId, windows: &[ConversationId]) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET open_chat_windows = ?2 WHERE id = ?1",
            params![id.to_string(), serde_json::to_string(windows)?],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Column list shared by every user SELECT.  Keep in sync with
/// [`row_to_user`].
pub(crate) const USER_COLUMNS: &str = "id, username, fullname, email, title, image, \
     is_admin, is_agent, password_hash, reset_pass_hash, reset_pass_expire, \
     access_token, device_tokens, deleted, last_online, open_chat_windows";

/// Map a `rusqlite::Row` to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let fullname: String = row.get(2)?;
    let email: String = row.get(3)?;
    let title: Option<String> = row.get(4)?;
    let image: Option<String> = row.get(5)?;
    let is_admin: bool = row.get(6)?;
    let is_agent: bool = row.get(7)?;
    let password_hash: String = row.get(8)?;
    let reset_pass_hash: Option<String> = row.get(9)?;
    let reset_pass_expire_str: Option<String> = row.get(10)?;
    let access_token: Option<String> = row.get(11)?;
    let device_tokens_json: String = row.get(12)?;
    let deleted: bool = row.get(13)?;
    let last_online_str: Option<String> = row.get(14)?;
    let open_windows_json: String = row.get(15)?;

    let id = parse_uuid_col(0, &id_str)?;

    let device_tokens: Vec<String> = serde_json::from_str(&device_tokens_json)
        .map_err(|e| conversion_err(12, e))?;
    let open_chat_windows: Vec<ConversationId> = serde_json::from_str(&open_windows_json)
        .map_err(|e| conversion_err(15, e))?;

    Ok(User {
        id: UserId(id),
        username,
        fullname,
        email,
        title,
        image,
        role: Role { is_admin, is_agent },
        password_hash,
        reset_pass_hash,
        reset_pass_expire: parse_ts_col(10, reset_pass_expire_str)?,
        access_token,
        device_tokens,
        deleted,
        last_online: parse_ts_col(14, last_online_str)?,
        open_chat_windows,
    })
}

pub(crate) fn parse_uuid_col(idx: usize, s: &str) -> rusqlite::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(s).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn parse_ts_col(
    idx: usize,
    s: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

pub(crate) fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}
