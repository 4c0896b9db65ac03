use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::Database;
use crate::models::uuid_at;

impl Database {
    pub fn insert_refresh_token(&self, user_id: Uuid, token_hash: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let now = Utc::now();
        let lifetime = (expires_at - now).num_seconds().max(0);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, lifetime_secs, revoked, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![Uuid::new_v4().to_string(), user_id.to_string(), token_hash, expires_at, lifetime, now],
            )?;
            Ok(())
        })
    }

    /// Revoke a live refresh token and store its replacement in one step.
    /// The replacement lives as long as the original did when issued.
    /// Returns the owner, or `None` when the token is unknown, expired or
    /// already revoked.
    pub fn rotate_refresh_token(&self, old_hash: &str, new_hash: &str, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let owner = tx
                .query_row(
                    "SELECT user_id, lifetime_secs FROM refresh_tokens
                     WHERE token_hash = ?1 AND revoked = 0 AND expires_at > ?2",
                    params![old_hash, now],
                    |row| Ok((uuid_at(row, 0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            let Some((user_id, lifetime)) = owner else {
                return Ok(None);
            };

            tx.execute("UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1", [old_hash])?;
            tx.execute(
                "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, lifetime_secs, revoked, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    user_id.to_string(),
                    new_hash,
                    now + Duration::seconds(lifetime),
                    lifetime,
                    now
                ],
            )?;
            tx.commit()?;
            Ok(Some(user_id))
        })
    }

    pub fn revoke_refresh_token(&self, token_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1", [token_hash])?;
            Ok(())
        })
    }

    /// Delete tokens that can never be used again.
    pub fn purge_refresh_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM refresh_tokens WHERE revoked = 1 OR expires_at <= ?1",
                params![now],
            )?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;
    use quartier_types::models::Role;

    #[test]
    fn rotation_revokes_the_old_token() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let now = Utc::now();

        db.insert_refresh_token(jane.id, "h1", now + Duration::days(7)).unwrap();
        assert_eq!(db.rotate_refresh_token("h1", "h2", now).unwrap(), Some(jane.id));
        assert_eq!(db.rotate_refresh_token("h1", "h3", now).unwrap(), None);
        assert_eq!(db.rotate_refresh_token("unknown", "h4", now).unwrap(), None);

        db.revoke_refresh_token("h2").unwrap();
        assert_eq!(db.rotate_refresh_token("h2", "h5", now).unwrap(), None);
    }

    #[test]
    fn expired_tokens_do_not_rotate_and_get_purged() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");

        db.insert_refresh_token(jane.id, "old", Utc::now() - Duration::minutes(1)).unwrap();
        db.insert_refresh_token(jane.id, "live", Utc::now() + Duration::days(1)).unwrap();
        assert_eq!(db.rotate_refresh_token("old", "x", Utc::now()).unwrap(), None);

        assert_eq!(db.purge_refresh_tokens(Utc::now()).unwrap(), 1);
        assert!(db.rotate_refresh_token("live", "next", Utc::now()).unwrap().is_some());
    }

    #[test]
    fn rotation_keeps_a_long_session_long() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        db.insert_refresh_token(jane.id, "remembered", Utc::now() + Duration::days(30)).unwrap();

        let later = Utc::now() + Duration::days(10);
        assert!(db.rotate_refresh_token("remembered", "rotated", later).unwrap().is_some());
        let expiry: DateTime<Utc> = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT expires_at FROM refresh_tokens WHERE token_hash = 'rotated'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(expiry > later + Duration::days(29));
        assert!(expiry <= later + Duration::days(30));
    }
}
