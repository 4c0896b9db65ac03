use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::{Badge, OwnedBadge, ShopBadge};

use crate::Database;
use crate::queries::count;
use crate::models::uuid_at;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purchase {
    Bought,
    /// Missing or withdrawn from sale
    Unavailable,
    AlreadyOwned,
    NotEnoughPoints,
}

const BADGE_COLUMNS: &str = "b.id, b.name, b.image_url, b.cost, b.available, b.created_at";

fn badge_at(row: &Row) -> rusqlite::Result<Badge> {
    Ok(Badge {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        image_url: row.get(2)?,
        cost: row.get(3)?,
        available: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl Database {
    /// The catalogue as seen by `viewer`.
    pub fn list_shop_badges(&self, viewer: Uuid) -> Result<Vec<ShopBadge>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, EXISTS (SELECT 1 FROM user_badges ub WHERE ub.badge_id = b.id AND ub.user_id = ?1)
                 FROM badges b ORDER BY b.cost, b.name",
                BADGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([viewer.to_string()], |row| {
                    Ok(ShopBadge {
                        badge: badge_at(row)?,
                        owned: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_badge(&self, id: Uuid) -> Result<Option<Badge>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM badges b WHERE b.id = ?1", BADGE_COLUMNS);
            Ok(conn.query_row(&sql, [id.to_string()], badge_at).optional()?)
        })
    }

    pub fn create_badge(&self, name: &str, image_url: &str, cost: i64, available: bool) -> Result<Badge> {
        let badge = Badge {
            id: Uuid::new_v4(),
            name: name.to_string(),
            image_url: image_url.to_string(),
            cost,
            available,
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO badges (id, name, image_url, cost, available, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![badge.id.to_string(), name, image_url, cost, available, badge.created_at],
            )?;
            Ok(())
        })?;
        Ok(badge)
    }

    pub fn delete_badge(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM badges WHERE id = ?1", [id.to_string()])? > 0))
    }

    pub fn badges_of(&self, user_id: Uuid) -> Result<Vec<OwnedBadge>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, ub.acquired_at FROM user_badges ub JOIN badges b ON b.id = ub.badge_id
                 WHERE ub.user_id = ?1 ORDER BY ub.acquired_at DESC",
                BADGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(OwnedBadge {
                        badge: badge_at(row)?,
                        acquired_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Spend points on a badge. The balance check and the debit happen in
    /// one transaction.
    pub fn buy_badge(&self, user_id: Uuid, badge_id: Uuid) -> Result<Purchase> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let cost: Option<i64> = tx
                .query_row(
                    "SELECT cost FROM badges WHERE id = ?1 AND available = 1",
                    [badge_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(cost) = cost else {
                return Ok(Purchase::Unavailable);
            };

            let owned = count(
                &tx,
                "SELECT COUNT(*) FROM user_badges WHERE user_id = ?1 AND badge_id = ?2",
                [user_id.to_string(), badge_id.to_string()],
            )?;
            if owned > 0 {
                return Ok(Purchase::AlreadyOwned);
            }

            let debited = tx.execute(
                "UPDATE users SET points = points - ?2 WHERE id = ?1 AND points >= ?2",
                params![user_id.to_string(), cost],
            )?;
            if debited == 0 {
                return Ok(Purchase::NotEnoughPoints);
            }
            tx.execute(
                "INSERT INTO user_badges (user_id, badge_id, acquired_at) VALUES (?1, ?2, ?3)",
                params![user_id.to_string(), badge_id.to_string(), Utc::now()],
            )?;
            tx.commit()?;
            Ok(Purchase::Bought)
        })
    }
}
