use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use quartier_types::api::{ChatGroup, ChatMessage};
use quartier_types::rooms::Room;

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, summary_at, uuid_at};
use crate::queries::count;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupExit {
    NotMember,
    Left,
    /// The leaving user was the last member; the group is gone.
    Deleted,
}

fn query_group(conn: &Connection, id: Uuid) -> Result<Option<ChatGroup>> {
    let head: Option<(String, Uuid, DateTime<Utc>)> = conn
        .query_row(
            "SELECT name, created_by, created_at FROM chat_groups WHERE id = ?1",
            [id.to_string()],
            |row| Ok((row.get(0)?, uuid_at(row, 1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((name, created_by, created_at)) = head else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT {} FROM chat_group_members m JOIN users a ON a.id = m.user_id
         WHERE m.group_id = ?1 ORDER BY m.joined_at",
        AUTHOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let members = stmt
        .query_map([id.to_string()], |row| summary_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(ChatGroup {
        id,
        name,
        room: Room::Group(id).to_string(),
        created_by,
        members,
        created_at,
    }))
}

impl Database {
    // -- Messages --

    pub fn insert_chat_message(&self, room: &str, author_id: Uuid, content: &str) -> Result<ChatMessage> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (id, room, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), room, author_id.to_string(), content, Utc::now()],
            )?;
            let sql = format!(
                "SELECT m.id, m.room, m.content, m.created_at, {}
                 FROM chat_messages m JOIN users a ON a.id = m.author_id WHERE m.id = ?1",
                AUTHOR_COLUMNS
            );
            let message = conn.query_row(&sql, [id.to_string()], |row| {
                Ok(ChatMessage {
                    id: uuid_at(row, 0)?,
                    room: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                    author: summary_at(row, 4)?,
                })
            })?;
            Ok(message)
        })
    }

    /// The latest `limit` messages of a room, oldest first.
    pub fn list_chat_messages(&self, room: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT * FROM (
                    SELECT m.id, m.room, m.content, m.created_at, {}
                    FROM chat_messages m JOIN users a ON a.id = m.author_id
                    WHERE m.room = ?1
                    ORDER BY m.created_at DESC
                    LIMIT ?2
                 ) ORDER BY 4 ASC",
                AUTHOR_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![room, limit], |row| {
                    Ok(ChatMessage {
                        id: uuid_at(row, 0)?,
                        room: row.get(1)?,
                        content: row.get(2)?,
                        created_at: row.get(3)?,
                        author: summary_at(row, 4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Groups --

    /// Create a group. The creator is always a member; duplicates are ignored.
    pub fn create_chat_group(&self, name: &str, created_by: Uuid, member_ids: &[Uuid]) -> Result<ChatGroup> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            tx.execute(
                "INSERT INTO chat_groups (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), name, created_by.to_string(), now],
            )?;
            for member in std::iter::once(&created_by).chain(member_ids) {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    params![id.to_string(), member.to_string(), now],
                )?;
            }
            let group = query_group(&tx, id)?;
            tx.commit()?;
            group.ok_or_else(|| anyhow::anyhow!("group {} vanished after insert", id))
        })
    }

    pub fn get_chat_group(&self, id: Uuid) -> Result<Option<ChatGroup>> {
        self.with_conn(|conn| query_group(conn, id))
    }

    pub fn is_group_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = count(
                conn,
                "SELECT COUNT(*) FROM chat_group_members WHERE group_id = ?1 AND user_id = ?2",
                [group_id.to_string(), user_id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn chat_groups_of(&self, user_id: Uuid) -> Result<Vec<ChatGroup>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id FROM chat_groups g JOIN chat_group_members m ON m.group_id = g.id
                 WHERE m.user_id = ?1 ORDER BY g.created_at DESC",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut groups = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(group) = query_group(conn, id)? {
                    groups.push(group);
                }
            }
            Ok(groups)
        })
    }

    pub fn leave_chat_group(&self, group_id: Uuid, user_id: Uuid) -> Result<GroupExit> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM chat_group_members WHERE group_id = ?1 AND user_id = ?2",
                [group_id.to_string(), user_id.to_string()],
            )?;
            if removed == 0 {
                return Ok(GroupExit::NotMember);
            }
            let left = count(
                &tx,
                "SELECT COUNT(*) FROM chat_group_members WHERE group_id = ?1",
                [group_id.to_string()],
            )?;
            let exit = if left == 0 {
                tx.execute("DELETE FROM chat_groups WHERE id = ?1", [group_id.to_string()])?;
                tx.execute("DELETE FROM chat_messages WHERE room = ?1", [Room::Group(group_id).to_string()])?;
                GroupExit::Deleted
            } else {
                GroupExit::Left
            };
            tx.commit()?;
            Ok(exit)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;
    use quartier_types::models::Role;

    #[test]
    fn history_is_oldest_first_and_capped() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        for text in ["un", "deux", "trois"] {
            db.insert_chat_message("general", jane.id, text).unwrap();
        }
        db.insert_chat_message("elsewhere", jane.id, "x").unwrap();

        let all: Vec<String> = db.list_chat_messages("general", 50).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(all, vec!["un", "deux", "trois"]);

        let last: Vec<String> = db.list_chat_messages("general", 2).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(last, vec!["deux", "trois"]);
    }

    #[test]
    fn group_membership() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let paul = user(&db, "paul@example.org", Role::User, "750101");

        let group = db.create_chat_group("Jardin partagé", jane.id, &[paul.id, jane.id]).unwrap();
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.room, format!("group-{}", group.id));
        assert!(db.is_group_member(group.id, paul.id).unwrap());
        assert_eq!(db.chat_groups_of(paul.id).unwrap().len(), 1);

        assert_eq!(db.leave_chat_group(group.id, paul.id).unwrap(), GroupExit::Left);
        assert_eq!(db.leave_chat_group(group.id, paul.id).unwrap(), GroupExit::NotMember);
        assert_eq!(db.leave_chat_group(group.id, jane.id).unwrap(), GroupExit::Deleted);
        assert!(db.get_chat_group(group.id).unwrap().is_none());
    }
}
