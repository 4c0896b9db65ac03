use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::MarketItem;
use quartier_types::models::User;
use quartier_types::rules::Paging;

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, json_list, json_list_at, summary_at, uuid_at};
use crate::queries::{IrisScope, count};

pub struct NewMarketItem<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub price: Option<f64>,
    pub images: &'a [String],
    pub contact_email: &'a str,
    pub contact_phone: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct MarketItemChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub images: Option<Vec<String>>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

fn item_select() -> String {
    format!(
        "SELECT m.id, m.title, m.description, m.price, m.images, m.contact_email, m.contact_phone,
                m.iris_code, m.iris_name, m.created_at, m.updated_at, {}
         FROM market_items m JOIN users a ON a.id = m.author_id",
        AUTHOR_COLUMNS
    )
}

fn item_at(row: &Row) -> rusqlite::Result<MarketItem> {
    Ok(MarketItem {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        images: json_list_at(row, 4)?,
        contact_email: row.get(5)?,
        contact_phone: row.get(6)?,
        iris_code: row.get(7)?,
        iris_name: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        author: summary_at(row, 11)?,
    })
}

fn query_item(conn: &Connection, id: Uuid) -> Result<Option<MarketItem>> {
    let sql = format!("{} WHERE m.id = ?1", item_select());
    Ok(conn.query_row(&sql, [id.to_string()], item_at).optional()?)
}

impl Database {
    /// Oldest listings first.
    pub fn list_market_items(&self, scope: IrisScope<'_>, paging: Paging) -> Result<(Vec<MarketItem>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE ?1 IS NULL OR m.iris_code = ?1 ORDER BY m.created_at ASC LIMIT ?2 OFFSET ?3",
                item_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![scope, paging.limit, paging.offset()], item_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total = count(
                conn,
                "SELECT COUNT(*) FROM market_items m WHERE ?1 IS NULL OR m.iris_code = ?1",
                [scope],
            )?;
            Ok((rows, total))
        })
    }

    /// Listings by one author, newest first.
    pub fn market_items_of(&self, author_id: Uuid) -> Result<Vec<MarketItem>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE m.author_id = ?1 ORDER BY m.created_at DESC", item_select());
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([author_id.to_string()], item_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_market_item(&self, id: Uuid) -> Result<Option<MarketItem>> {
        self.with_conn(|conn| query_item(conn, id))
    }

    pub fn create_market_item(&self, author: &User, new: &NewMarketItem<'_>) -> Result<MarketItem> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO market_items (id, title, description, price, images, contact_email, contact_phone,
                                           author_id, iris_code, iris_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id.to_string(),
                    new.title,
                    new.description,
                    new.price,
                    json_list(new.images),
                    new.contact_email,
                    new.contact_phone,
                    author.id.to_string(),
                    author.iris_code,
                    author.iris_name,
                    Utc::now(),
                ],
            )?;
            query_item(conn, id)?.ok_or_else(|| anyhow::anyhow!("market item {} vanished after insert", id))
        })
    }

    pub fn update_market_item(&self, id: Uuid, changes: &MarketItemChanges) -> Result<Option<MarketItem>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE market_items SET
                    title         = COALESCE(?2, title),
                    description   = COALESCE(?3, description),
                    price         = COALESCE(?4, price),
                    images        = COALESCE(?5, images),
                    contact_email = COALESCE(?6, contact_email),
                    contact_phone = COALESCE(?7, contact_phone),
                    updated_at    = ?8
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    changes.title,
                    changes.description,
                    changes.price,
                    changes.images.as_deref().map(json_list),
                    changes.contact_email,
                    changes.contact_phone,
                    Utc::now(),
                ],
            )?;
            query_item(conn, id)
        })
    }

    pub fn delete_market_item(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM market_items WHERE id = ?1", [id.to_string()])? > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;
    use quartier_types::models::Role;
    use quartier_types::rules::PageQuery;

    fn listing(db: &Database, author: &User, title: &str) -> MarketItem {
        let images = vec!["/uploads/market/velo.png".to_string()];
        db.create_market_item(
            author,
            &NewMarketItem {
                title,
                description: "Bon état",
                price: Some(40.0),
                images: &images,
                contact_email: "jane@example.org",
                contact_phone: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn listings_are_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let first = listing(&db, &jane, "Vélo");
        let second = listing(&db, &jane, "Lampe");

        let (items, total) = db.list_market_items(Some("750101"), PageQuery::default().resolve(10)).unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].id, first.id);
        assert_eq!(items[1].id, second.id);
        assert_eq!(items[0].images.len(), 1);

        let mine = db.market_items_of(jane.id).unwrap();
        assert_eq!(mine[0].id, second.id);
    }

    #[test]
    fn partial_update() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let item = listing(&db, &jane, "Vélo");

        let updated = db
            .update_market_item(item.id, &MarketItemChanges { price: Some(35.5), ..Default::default() })
            .unwrap()
            .unwrap();
        assert_eq!(updated.price, Some(35.5));
        assert_eq!(updated.title, "Vélo");
        assert!(db.delete_market_item(item.id).unwrap());
        assert!(db.get_market_item(item.id).unwrap().is_none());
    }
}
