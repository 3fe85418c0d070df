//! CRUD operations for [`Group`] records.
//!
//! The real-time core is a pure reader here: [`Database::get_all_groups_of_user`]
//! feeds the group-visibility resolver.  Creation helpers exist for the
//! account subsystem and for tests.

use rusqlite::params;

use kestrel_shared::types::{GroupId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Group;
use crate::users::{parse_uuid_col, row_to_user, USER_COLUMNS};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new (empty) group.
    pub fn create_group(&self, id: GroupId, name: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO groups (id, name) VALUES (?1, ?2)",
            params![id.to_string(), name],
        )?;
        Ok(())
    }

    /// Add a user to a group.  Re-adding an existing member is a no-op.
    pub fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            params![group_id.to_string(), user_id.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single group with hydrated members.
    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let name: String = self
            .conn()
            .query_row(
                "SELECT name FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(Group {
            id,
            name,
            members: self.group_members(id)?,
        })
    }

    /// All groups the user belongs to, each with hydrated members,
    /// ordered by group name.
    pub fn get_all_groups_of_user(&self, user_id: UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name
             FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.user_id = ?1
             ORDER BY g.name ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let name: String = row.get(1)?;
            Ok((parse_uuid_col(0, &id_str)?, name))
        })?;

        let mut groups = Vec::new();
        for row in rows {
            let (id, name) = row?;
            let id = GroupId(id);
            groups.push(Group {
                id,
                name,
                members: self.group_members(id)?,
            });
        }
        Ok(groups)
    }

    fn group_members(&self, group_id: GroupId) -> Result<Vec<crate::models::User>> {
        // `group_members` has no column named like any user column, so the
        // unqualified USER_COLUMNS resolve to `users` here.
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM users
             JOIN group_members gm ON gm.user_id = users.id
             WHERE gm.group_id = ?1
             ORDER BY users.username ASC",
            USER_COLUMNS
        ))?;

        let rows = stmt.query_map(params![group_id.to_string()], row_to_user)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}
