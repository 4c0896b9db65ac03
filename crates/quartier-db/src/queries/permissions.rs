use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::{Permission, Restriction};

use crate::Database;
use crate::models::uuid_at;

const RESTRICTION_COLUMNS: &str =
    "id, user_id, permission_code, reason, restricted_by, expires_at, created_at";

fn restriction_at(row: &Row) -> rusqlite::Result<Restriction> {
    Ok(Restriction {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        permission_code: row.get(2)?,
        reason: row.get(3)?,
        restricted_by: uuid_at(row, 4)?,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl Database {
    pub fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT code, description FROM permissions ORDER BY code")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Permission {
                        code: row.get(0)?,
                        description: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn permission_exists(&self, code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM permissions WHERE code = ?1", [code], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// The restriction on `code` for `user_id` that is still in force at `now`.
    pub fn active_restriction(&self, user_id: Uuid, code: &str, now: DateTime<Utc>) -> Result<Option<Restriction>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM user_restrictions
                 WHERE user_id = ?1 AND permission_code = ?2 AND expires_at > ?3
                 ORDER BY expires_at DESC LIMIT 1",
                RESTRICTION_COLUMNS
            );
            let row = conn
                .query_row(&sql, params![user_id.to_string(), code, now], restriction_at)
                .optional()?;
            Ok(row)
        })
    }

    pub fn create_restriction(
        &self,
        user_id: Uuid,
        code: &str,
        reason: &str,
        restricted_by: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Restriction> {
        let restriction = Restriction {
            id: Uuid::new_v4(),
            user_id,
            permission_code: code.to_string(),
            reason: reason.to_string(),
            restricted_by,
            expires_at,
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_restrictions (id, user_id, permission_code, reason, restricted_by, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    restriction.id.to_string(),
                    user_id.to_string(),
                    code,
                    reason,
                    restricted_by.to_string(),
                    expires_at,
                    restriction.created_at,
                ],
            )?;
            Ok(())
        })?;
        Ok(restriction)
    }

    /// Lift every restriction on `code` for `user_id`.
    pub fn remove_restrictions(&self, user_id: Uuid, code: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM user_restrictions WHERE user_id = ?1 AND permission_code = ?2",
                params![user_id.to_string(), code],
            )?;
            Ok(removed)
        })
    }

    pub fn purge_expired_restrictions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM user_restrictions WHERE expires_at <= ?1", params![now])?;
            Ok(removed)
        })
    }
}
