use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use quartier_types::models::{DEFAULT_PROFILE_PICTURE, Role, User, UserSummary};

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, NewUser, USER_COLUMNS, UserRow, summary_at, user_at};

/// Partial update of a user; `None` keeps the current value.
#[derive(Debug, Default)]
pub struct UserChanges {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub role: Option<Role>,
}

/// Relationship between the viewer of a profile and its owner.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FriendshipState {
    pub is_friend: bool,
    pub request_sent: bool,
    pub request_received: bool,
}

impl Database {
    // -- Accounts --

    pub fn create_user(&self, new: &NewUser<'_>) -> Result<User> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, firstname, lastname, email, password, date_of_birth,
                                    profile_picture, role, address, iris_code, iris_name, points, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
                params![
                    id.to_string(),
                    new.firstname,
                    new.lastname,
                    new.email,
                    new.password_hash,
                    new.date_of_birth,
                    DEFAULT_PROFILE_PICTURE,
                    new.role.as_str(),
                    new.address,
                    new.iris_code,
                    new.iris_name,
                    Utc::now(),
                ],
            )?;
            query_user(conn, id)?.ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id))
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_user_row_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {}, u.password FROM users u WHERE u.email = ?1", USER_COLUMNS);
            let row = conn
                .query_row(&sql, [email], |row| {
                    Ok(UserRow {
                        user: user_at(row, 0)?,
                        password_hash: row.get(12)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Whether `email` belongs to an account other than `except`.
    pub fn email_taken(&self, email: &str, except: Option<Uuid>) -> Result<bool> {
        self.with_conn(|conn| {
            let owner: Option<String> = conn
                .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| row.get(0))
                .optional()?;
            Ok(match (owner, except) {
                (Some(owner), Some(except)) => owner != except.to_string(),
                (Some(_), None) => true,
                (None, _) => false,
            })
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users u ORDER BY u.lastname, u.firstname", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| user_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive substring match on first or last name.
    pub fn search_users(&self, needle: &str, limit: u32) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users u
                 WHERE instr(lower(u.firstname), lower(?1)) > 0
                    OR instr(lower(u.lastname), lower(?1)) > 0
                 ORDER BY u.lastname, u.firstname
                 LIMIT ?2",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![needle, limit], |row| user_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_user(&self, id: Uuid, changes: &UserChanges) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET
                    firstname     = COALESCE(?2, firstname),
                    lastname      = COALESCE(?3, lastname),
                    email         = COALESCE(?4, email),
                    password      = COALESCE(?5, password),
                    date_of_birth = COALESCE(?6, date_of_birth),
                    role          = COALESCE(?7, role)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    changes.firstname,
                    changes.lastname,
                    changes.email,
                    changes.password_hash,
                    changes.date_of_birth,
                    changes.role.map(|r| r.as_str()),
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_user(conn, id)
        })
    }

    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    /// Replace the profile picture, returning the previous one.
    pub fn set_profile_picture(&self, id: Uuid, url: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let previous: Option<String> = tx
                .query_row(
                    "SELECT profile_picture FROM users WHERE id = ?1",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if previous.is_some() {
                tx.execute(
                    "UPDATE users SET profile_picture = ?2 WHERE id = ?1",
                    params![id.to_string(), url],
                )?;
            }
            tx.commit()?;
            Ok(previous)
        })
    }

    pub fn set_address(&self, id: Uuid, address: &str, iris_code: &str, iris_name: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET address = ?2, iris_code = ?3, iris_name = ?4 WHERE id = ?1",
                params![id.to_string(), address, iris_code, iris_name],
            )?;
            query_user(conn, id)
        })
    }

    /// Every admin, plus the moderators of one neighborhood.
    pub fn list_staff(&self, iris_code: &str) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users u
                 WHERE u.role = 'admin' OR (u.role = 'moderator' AND u.iris_code = ?1)
                 ORDER BY u.role, u.lastname",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([iris_code], |row| user_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Friends --

    pub fn list_friends(&self, user_id: Uuid) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM friendships f
                 JOIN users a ON a.id = f.friend_id
                 WHERE f.user_id = ?1
                 ORDER BY a.lastname, a.firstname",
                AUTHOR_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| summary_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn friendship_state(&self, viewer: Uuid, other: Uuid) -> Result<FriendshipState> {
        self.with_conn(|conn| {
            let exists = |sql: &str| -> Result<bool> {
                Ok(conn
                    .query_row(sql, [viewer.to_string(), other.to_string()], |_| Ok(()))
                    .optional()?
                    .is_some())
            };
            Ok(FriendshipState {
                is_friend: exists("SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2")?,
                request_sent: exists(
                    "SELECT 1 FROM friend_requests WHERE sender_id = ?1 AND recipient_id = ?2",
                )?,
                request_received: exists(
                    "SELECT 1 FROM friend_requests WHERE sender_id = ?2 AND recipient_id = ?1",
                )?,
            })
        })
    }

    /// Returns `false` when the same request is already pending.
    pub fn create_friend_request(&self, sender: Uuid, recipient: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO friend_requests (sender_id, recipient_id, created_at) VALUES (?1, ?2, ?3)",
                params![sender.to_string(), recipient.to_string(), Utc::now()],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Turn the pending request `sender -> recipient` into a friendship.
    /// Returns `false` when there was no such request.
    pub fn accept_friend_request(&self, sender: Uuid, recipient: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM friend_requests WHERE sender_id = ?1 AND recipient_id = ?2",
                [sender.to_string(), recipient.to_string()],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            let now = Utc::now();
            for (a, b) in [(sender, recipient), (recipient, sender)] {
                tx.execute(
                    "INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at) VALUES (?1, ?2, ?3)",
                    params![a.to_string(), b.to_string(), now],
                )?;
            }
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn delete_friend_request(&self, sender: Uuid, recipient: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM friend_requests WHERE sender_id = ?1 AND recipient_id = ?2",
                [sender.to_string(), recipient.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn remove_friendship(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM friendships
                 WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
                [a.to_string(), b.to_string()],
            )?;
            Ok(removed > 0)
        })
    }
}

pub(crate) fn query_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users u WHERE u.id = ?1", USER_COLUMNS);
    let user = conn.query_row(&sql, [id.to_string()], |row| user_at(row, 0)).optional()?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;

    #[test]
    fn email_lookup_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");

        let row = db.get_user_row_by_email("JANE@example.org").unwrap().unwrap();
        assert_eq!(row.user.id, jane.id);
        assert_eq!(row.password_hash, "hash");
        assert!(db.email_taken("Jane@Example.org", None).unwrap());
        assert!(!db.email_taken("jane@example.org", Some(jane.id)).unwrap());
        assert!(!db.email_taken("other@example.org", None).unwrap());
        assert_eq!(jane.profile_picture, DEFAULT_PROFILE_PICTURE);
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");

        let updated = db
            .update_user(
                jane.id,
                &UserChanges {
                    firstname: Some("Janine".into()),
                    role: Some(Role::Moderator),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.firstname, "Janine");
        assert_eq!(updated.lastname, jane.lastname);
        assert_eq!(updated.role, Role::Moderator);
        assert!(db.update_user(Uuid::new_v4(), &UserChanges::default()).unwrap().is_none());
    }

    #[test]
    fn search_matches_names() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "dupont@example.org", Role::User, "750101");
        user(&db, "martin@example.org", Role::User, "750101");

        let found = db.search_users("DUPONT", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "dupont@example.org");
        assert_eq!(db.search_users("test", 1).unwrap().len(), 1);
    }

    #[test]
    fn staff_is_admins_plus_local_moderators() {
        let db = Database::open_in_memory().unwrap();
        let admin = user(&db, "admin@example.org", Role::Admin, "690001");
        let local = user(&db, "mod@example.org", Role::Moderator, "750101");
        user(&db, "far@example.org", Role::Moderator, "130001");
        user(&db, "user@example.org", Role::User, "750101");

        let ids: Vec<Uuid> = db.list_staff("750101").unwrap().iter().map(|u| u.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&admin.id));
        assert!(ids.contains(&local.id));
    }

    #[test]
    fn friend_request_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org", Role::User, "750101");
        let b = user(&db, "b@example.org", Role::User, "750101");

        assert!(db.create_friend_request(a.id, b.id).unwrap());
        assert!(!db.create_friend_request(a.id, b.id).unwrap());
        let state = db.friendship_state(a.id, b.id).unwrap();
        assert!(state.request_sent && !state.request_received && !state.is_friend);
        assert!(db.friendship_state(b.id, a.id).unwrap().request_received);

        assert!(!db.accept_friend_request(b.id, a.id).unwrap());
        assert!(db.accept_friend_request(a.id, b.id).unwrap());
        assert!(db.friendship_state(b.id, a.id).unwrap().is_friend);
        assert_eq!(db.list_friends(a.id).unwrap()[0].id, b.id);
        assert_eq!(db.list_friends(b.id).unwrap()[0].id, a.id);

        assert!(db.remove_friendship(b.id, a.id).unwrap());
        assert!(db.list_friends(a.id).unwrap().is_empty());
        assert!(!db.remove_friendship(a.id, b.id).unwrap());
    }

    #[test]
    fn deleting_a_user_cascades() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org", Role::User, "750101");
        let b = user(&db, "b@example.org", Role::User, "750101");
        db.create_friend_request(a.id, b.id).unwrap();

        assert!(db.delete_user(a.id).unwrap());
        assert!(!db.delete_user(a.id).unwrap());
        assert!(!db.friendship_state(b.id, a.id).unwrap().request_received);
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let first = user(&db, "twin@example.org", Role::User, "750101");
        let err = db
            .create_user(&NewUser {
                firstname: "Other",
                lastname: "Twin",
                email: "Twin@Example.org",
                password_hash: "hash",
                date_of_birth: NaiveDate::from_ymd_opt(1991, 1, 1).unwrap(),
                role: Role::User,
                address: None,
                iris_code: "750101",
                iris_name: "Quartier",
            })
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));
        assert!(!crate::is_unique_violation(&anyhow::anyhow!("other failure")));
        assert_eq!(db.list_users().unwrap().len(), 1);
        assert_eq!(db.list_users().unwrap()[0].id, first.id);
    }
}
