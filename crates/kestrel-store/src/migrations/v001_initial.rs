//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `groups`, `group_members`,
//! `conversations`, `conversation_participants`, and `chat_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    username          TEXT NOT NULL UNIQUE,
    fullname          TEXT NOT NULL,
    email             TEXT NOT NULL,
    title             TEXT,
    image             TEXT,
    is_admin          INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    is_agent          INTEGER NOT NULL DEFAULT 0,
    password_hash     TEXT NOT NULL,
    reset_pass_hash   TEXT,
    reset_pass_expire TEXT,                        -- ISO-8601 / RFC-3339
    access_token      TEXT,
    device_tokens     TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    deleted           INTEGER NOT NULL DEFAULT 0,
    last_online       TEXT,
    open_chat_windows TEXT NOT NULL DEFAULT '[]'   -- JSON array of UUIDs
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id   TEXT PRIMARY KEY NOT NULL,               -- UUID v4
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,                       -- FK -> groups(id)
    user_id  TEXT NOT NULL,                       -- FK -> users(id)

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)  REFERENCES users(id)  ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,         -- UUID v4
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,                -- FK -> conversations(id)
    user_id         TEXT NOT NULL,                -- FK -> users(id)
    deleted_at      TEXT,                         -- per-user soft delete

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)         REFERENCES users(id)         ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_convo_participants_user
    ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Chat messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id              TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    conversation_id TEXT NOT NULL,                -- FK -> conversations(id)
    owner_id        TEXT NOT NULL,                -- FK -> users(id)
    body            TEXT NOT NULL,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (owner_id)        REFERENCES users(id)         ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_convo_ts
    ON chat_messages(conversation_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
