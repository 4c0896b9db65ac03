use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::GalleryItem;
use quartier_types::models::User;
use quartier_types::rules::Paging;

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, summary_at, uuid_at};
use crate::queries::news::toggle_like_in;
use crate::queries::{IrisScope, count};

fn item_select() -> String {
    format!(
        "SELECT g.id, g.url, g.description, g.iris_code, g.created_at,
                (SELECT COUNT(*) FROM gallery_likes l WHERE l.item_id = g.id),
                EXISTS (SELECT 1 FROM gallery_likes l WHERE l.item_id = g.id AND l.user_id = ?1),
                {}
         FROM gallery_items g JOIN users a ON a.id = g.author_id",
        AUTHOR_COLUMNS
    )
}

fn item_at(row: &Row) -> rusqlite::Result<GalleryItem> {
    Ok(GalleryItem {
        id: uuid_at(row, 0)?,
        url: row.get(1)?,
        description: row.get(2)?,
        iris_code: row.get(3)?,
        created_at: row.get(4)?,
        likes_count: row.get(5)?,
        liked: row.get(6)?,
        author: summary_at(row, 7)?,
    })
}

fn query_item(conn: &Connection, id: Uuid, viewer: Uuid) -> Result<Option<GalleryItem>> {
    let sql = format!("{} WHERE g.id = ?2", item_select());
    Ok(conn
        .query_row(&sql, [viewer.to_string(), id.to_string()], item_at)
        .optional()?)
}

impl Database {
    /// Newest first; `liked` is computed for `viewer`.
    pub fn list_gallery(&self, scope: IrisScope<'_>, paging: Paging, viewer: Uuid) -> Result<(Vec<GalleryItem>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE ?2 IS NULL OR g.iris_code = ?2 ORDER BY g.created_at DESC LIMIT ?3 OFFSET ?4",
                item_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![viewer.to_string(), scope, paging.limit, paging.offset()], item_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total = count(
                conn,
                "SELECT COUNT(*) FROM gallery_items g WHERE ?1 IS NULL OR g.iris_code = ?1",
                [scope],
            )?;
            Ok((rows, total))
        })
    }

    pub fn get_gallery_item(&self, id: Uuid, viewer: Uuid) -> Result<Option<GalleryItem>> {
        self.with_conn(|conn| query_item(conn, id, viewer))
    }

    pub fn create_gallery_item(&self, author: &User, url: &str, description: Option<&str>) -> Result<GalleryItem> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO gallery_items (id, url, description, author_id, iris_code, iris_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    url,
                    description,
                    author.id.to_string(),
                    author.iris_code,
                    author.iris_name,
                    Utc::now(),
                ],
            )?;
            query_item(conn, id, author.id)?.ok_or_else(|| anyhow::anyhow!("gallery item {} vanished after insert", id))
        })
    }

    pub fn toggle_gallery_like(&self, item_id: Uuid, user_id: Uuid) -> Result<(bool, i64)> {
        toggle_like_in(self, "gallery_likes", "item_id", item_id, user_id)
    }

    pub fn delete_gallery_item(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM gallery_items WHERE id = ?1", [id.to_string()])? > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;
    use quartier_types::models::Role;
    use quartier_types::rules::PageQuery;

    #[test]
    fn likes_are_per_viewer() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let paul = user(&db, "paul@example.org", Role::User, "750101");
        let item = db.create_gallery_item(&jane, "/uploads/gallery/a.png", Some("Coucher de soleil")).unwrap();

        assert_eq!(db.toggle_gallery_like(item.id, paul.id).unwrap(), (true, 1));
        assert!(db.get_gallery_item(item.id, paul.id).unwrap().unwrap().liked);
        assert!(!db.get_gallery_item(item.id, jane.id).unwrap().unwrap().liked);

        let (items, total) = db.list_gallery(Some("750101"), PageQuery::default().resolve(30), paul.id).unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].likes_count, 1);
        assert!(items[0].liked);

        assert!(db.delete_gallery_item(item.id).unwrap());
        assert!(db.get_gallery_item(item.id, jane.id).unwrap().is_none());
    }
}
