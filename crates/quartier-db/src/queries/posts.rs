use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::Post;
use quartier_types::models::User;
use quartier_types::rules::Paging;

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, summary_at, uuid_at};
use crate::queries::{IrisScope, count};

/// Posts and flash posts share a shape; flash posts carry an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Regular,
    Flash,
}

impl PostKind {
    fn table(&self) -> &'static str {
        match self {
            Self::Regular => "posts",
            Self::Flash => "flash_posts",
        }
    }

    fn expiry_column(&self) -> &'static str {
        match self {
            Self::Regular => "NULL",
            Self::Flash => "p.expires_at",
        }
    }

    /// Rows visible at instant `?4`. Flash posts past their expiry are
    /// invisible even before the purge job runs.
    fn live_filter(&self) -> &'static str {
        match self {
            Self::Regular => "p.created_at <= ?4",
            Self::Flash => "p.expires_at > ?4",
        }
    }
}

fn post_at(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        iris_code: row.get(3)?,
        iris_name: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        expires_at: row.get(7)?,
        author: summary_at(row, 8)?,
    })
}

fn select_sql(kind: PostKind) -> String {
    format!(
        "SELECT p.id, p.title, p.description, p.iris_code, p.iris_name, p.created_at, p.updated_at, {}, {}
         FROM {} p JOIN users a ON a.id = p.author_id",
        kind.expiry_column(),
        AUTHOR_COLUMNS,
        kind.table()
    )
}

fn query_post(conn: &Connection, kind: PostKind, id: Uuid) -> Result<Option<Post>> {
    let sql = format!("{} WHERE p.id = ?1", select_sql(kind));
    Ok(conn.query_row(&sql, [id.to_string()], post_at).optional()?)
}

impl Database {
    /// Newest first. `now` hides expired flash posts.
    pub fn list_posts(
        &self,
        kind: PostKind,
        scope: IrisScope<'_>,
        paging: Paging,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Post>, u64)> {
        self.with_conn(|conn| {
            let filter = format!("(?1 IS NULL OR p.iris_code = ?1) AND {}", kind.live_filter());
            let sql = format!(
                "{} WHERE {} ORDER BY p.created_at DESC LIMIT ?2 OFFSET ?3",
                select_sql(kind),
                filter
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![scope, paging.limit, paging.offset(), now], post_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total = count(
                conn,
                &format!(
                    "SELECT COUNT(*) FROM {} p WHERE {}",
                    kind.table(),
                    filter.replace("?4", "?2")
                ),
                params![scope, now],
            )?;
            Ok((rows, total))
        })
    }

    pub fn get_post(&self, kind: PostKind, id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, kind, id))
    }

    pub fn create_post(
        &self,
        kind: PostKind,
        author: &User,
        title: &str,
        description: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Post> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.with_conn(|conn| {
            match kind {
                PostKind::Regular => conn.execute(
                    "INSERT INTO posts (id, title, description, author_id, iris_code, iris_name, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![id.to_string(), title, description, author.id.to_string(), author.iris_code, author.iris_name, now],
                )?,
                PostKind::Flash => conn.execute(
                    "INSERT INTO flash_posts (id, title, description, author_id, iris_code, iris_name, created_at, updated_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
                    params![
                        id.to_string(),
                        title,
                        description,
                        author.id.to_string(),
                        author.iris_code,
                        author.iris_name,
                        now,
                        expires_at.unwrap_or(now),
                    ],
                )?,
            };
            query_post(conn, kind, id)?.ok_or_else(|| anyhow::anyhow!("post {} vanished after insert", id))
        })
    }

    /// Whether `author_id` has a flash post that has not expired yet.
    pub fn has_live_flash_post(&self, author_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let n = count(
                conn,
                "SELECT COUNT(*) FROM flash_posts WHERE author_id = ?1 AND expires_at > ?2",
                params![author_id.to_string(), now],
            )?;
            Ok(n > 0)
        })
    }

    pub fn update_post(
        &self,
        kind: PostKind,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Post>> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE {} SET title = COALESCE(?2, title), description = COALESCE(?3, description), updated_at = ?4
                 WHERE id = ?1",
                kind.table()
            );
            conn.execute(&sql, params![id.to_string(), title, description, Utc::now()])?;
            query_post(conn, kind, id)
        })
    }

    pub fn delete_post(&self, kind: PostKind, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
            Ok(conn.execute(&sql, [id.to_string()])? > 0)
        })
    }

    pub fn purge_expired_flash_posts(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM flash_posts WHERE expires_at <= ?1", params![now])?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::IrisBound;
    use crate::queries::testing::user;
    use chrono::Duration;
    use quartier_types::models::Role;
    use quartier_types::rules::PageQuery;

    fn paging() -> Paging {
        PageQuery::default().resolve(10)
    }

    #[test]
    fn listing_is_scoped_and_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let far = user(&db, "far@example.org", Role::User, "130001");

        let first = db.create_post(PostKind::Regular, &jane, "first", "a", None).unwrap();
        let second = db.create_post(PostKind::Regular, &jane, "second", "b", None).unwrap();
        db.create_post(PostKind::Regular, &far, "elsewhere", "c", None).unwrap();

        let (posts, total) = db.list_posts(PostKind::Regular, Some("750101"), paging(), Utc::now()).unwrap();
        assert_eq!(total, 2);
        assert_eq!(posts[0].id, second.id);
        assert_eq!(posts[1].id, first.id);
        assert_eq!(posts[0].author.id, jane.id);

        let (all, total) = db.list_posts(PostKind::Regular, None, paging(), Utc::now()).unwrap();
        assert_eq!((all.len(), total), (3, 3));
    }

    #[test]
    fn flash_posts_expire() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let now = Utc::now();

        let post = db
            .create_post(PostKind::Flash, &jane, "vite", "b", Some(now + Duration::hours(24)))
            .unwrap();
        assert!(post.expires_at.is_some());
        assert!(db.has_live_flash_post(jane.id, now).unwrap());

        let later = now + Duration::hours(25);
        assert!(!db.has_live_flash_post(jane.id, later).unwrap());
        let (posts, total) = db.list_posts(PostKind::Flash, None, paging(), later).unwrap();
        assert!(posts.is_empty());
        assert_eq!(total, 0);

        assert_eq!(db.purge_expired_flash_posts(later).unwrap(), 1);
        assert!(db.get_post(PostKind::Flash, post.id).unwrap().is_none());
    }

    #[test]
    fn update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let post = db.create_post(PostKind::Regular, &jane, "title", "text", None).unwrap();

        let updated = db.update_post(PostKind::Regular, post.id, Some("new"), None).unwrap().unwrap();
        assert_eq!(updated.title, "new");
        assert_eq!(updated.description, "text");

        assert!(db.delete_post(PostKind::Regular, post.id).unwrap());
        assert!(!db.delete_post(PostKind::Regular, post.id).unwrap());
    }

    #[test]
    fn moving_author_drops_old_posts() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let post = db.create_post(PostKind::Regular, &jane, "t", "d", None).unwrap();

        assert_eq!(db.purge_iris_mismatches(IrisBound::Posts).unwrap(), 0);
        db.set_address(jane.id, "1 rue X", "690001", "Lyon").unwrap();
        assert_eq!(db.purge_iris_mismatches(IrisBound::Posts).unwrap(), 1);
        assert!(db.get_post(PostKind::Regular, post.id).unwrap().is_none());
    }
}
