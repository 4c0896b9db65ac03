use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::{Comment, News};
use quartier_types::models::{NewsStatus, User};
use quartier_types::rules::Paging;

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, json_list, json_list_at, parsed_at, summary_at, uuid_at};
use crate::queries::{IrisScope, count};

pub struct NewNews<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub tags: &'a [String],
    pub images: &'a [String],
    pub published: bool,
}

#[derive(Debug, Default)]
pub struct NewsChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub published: Option<bool>,
}

fn news_select() -> String {
    format!(
        "SELECT n.id, n.title, n.content, n.tags, n.images, n.published, n.status, n.rejection_reason,
                (SELECT COUNT(*) FROM news_likes l WHERE l.news_id = n.id),
                n.iris_code, n.iris_name, n.created_at, n.updated_at, {}
         FROM news n JOIN users a ON a.id = n.author_id",
        AUTHOR_COLUMNS
    )
}

fn news_at(row: &Row) -> rusqlite::Result<News> {
    Ok(News {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        tags: json_list_at(row, 3)?,
        images: json_list_at(row, 4)?,
        published: row.get(5)?,
        status: parsed_at(row, 6)?,
        rejection_reason: row.get(7)?,
        likes_count: row.get(8)?,
        iris_code: row.get(9)?,
        iris_name: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        author: summary_at(row, 13)?,
    })
}

fn query_news(conn: &Connection, id: Uuid) -> Result<Option<News>> {
    let sql = format!("{} WHERE n.id = ?1", news_select());
    Ok(conn.query_row(&sql, [id.to_string()], news_at).optional()?)
}

fn comment_select() -> String {
    format!(
        "SELECT c.id, c.news_id, c.content, c.iris_code,
                (SELECT COUNT(*) FROM comment_likes l WHERE l.comment_id = c.id),
                c.created_at, c.updated_at, {}
         FROM comments c JOIN users a ON a.id = c.author_id",
        AUTHOR_COLUMNS
    )
}

fn comment_at(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: uuid_at(row, 0)?,
        news_id: uuid_at(row, 1)?,
        content: row.get(2)?,
        iris_code: row.get(3)?,
        likes_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        author: summary_at(row, 7)?,
    })
}

fn query_comment(conn: &Connection, id: Uuid) -> Result<Option<Comment>> {
    let sql = format!("{} WHERE c.id = ?1", comment_select());
    Ok(conn.query_row(&sql, [id.to_string()], comment_at).optional()?)
}

/// Insert or remove a like row. Returns `(liked, total)` after the toggle.
fn toggle_like(conn: &mut Connection, table: &str, column: &str, target: Uuid, user_id: Uuid) -> Result<(bool, i64)> {
    let tx = conn.transaction()?;
    let removed = tx.execute(
        &format!("DELETE FROM {} WHERE {} = ?1 AND user_id = ?2", table, column),
        [target.to_string(), user_id.to_string()],
    )?;
    if removed == 0 {
        tx.execute(
            &format!("INSERT INTO {} ({}, user_id) VALUES (?1, ?2)", table, column),
            [target.to_string(), user_id.to_string()],
        )?;
    }
    let total: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, column),
        [target.to_string()],
        |row| row.get(0),
    )?;
    tx.commit()?;
    Ok((removed == 0, total))
}

pub(crate) fn toggle_like_in(
    db: &Database,
    table: &'static str,
    column: &'static str,
    target: Uuid,
    user_id: Uuid,
) -> Result<(bool, i64)> {
    db.with_conn_mut(|conn| toggle_like(conn, table, column, target, user_id))
}

impl Database {
    // -- News --

    pub fn list_news(&self, scope: IrisScope<'_>, paging: Paging) -> Result<(Vec<News>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE ?1 IS NULL OR n.iris_code = ?1 ORDER BY n.created_at DESC LIMIT ?2 OFFSET ?3",
                news_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![scope, paging.limit, paging.offset()], news_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total = count(conn, "SELECT COUNT(*) FROM news n WHERE ?1 IS NULL OR n.iris_code = ?1", [scope])?;
            Ok((rows, total))
        })
    }

    pub fn get_news(&self, id: Uuid) -> Result<Option<News>> {
        self.with_conn(|conn| query_news(conn, id))
    }

    pub fn create_news(&self, author: &User, new: &NewNews<'_>) -> Result<News> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO news (id, title, content, author_id, tags, images, published, status,
                                   iris_code, iris_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id.to_string(),
                    new.title,
                    new.content,
                    author.id.to_string(),
                    json_list(new.tags),
                    json_list(new.images),
                    new.published,
                    NewsStatus::Pending.as_str(),
                    author.iris_code,
                    author.iris_name,
                    Utc::now(),
                ],
            )?;
            query_news(conn, id)?.ok_or_else(|| anyhow::anyhow!("news {} vanished after insert", id))
        })
    }

    /// Apply edits. Edited news goes back to moderation.
    pub fn update_news(&self, id: Uuid, changes: &NewsChanges) -> Result<Option<News>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE news SET
                    title      = COALESCE(?2, title),
                    content    = COALESCE(?3, content),
                    tags       = COALESCE(?4, tags),
                    images     = COALESCE(?5, images),
                    published  = COALESCE(?6, published),
                    status     = ?7,
                    rejection_reason = NULL,
                    updated_at = ?8
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    changes.title,
                    changes.content,
                    changes.tags.as_deref().map(json_list),
                    changes.images.as_deref().map(json_list),
                    changes.published,
                    NewsStatus::Pending.as_str(),
                    Utc::now(),
                ],
            )?;
            query_news(conn, id)
        })
    }

    pub fn set_news_status(&self, id: Uuid, status: NewsStatus, reason: Option<&str>) -> Result<Option<News>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE news SET status = ?2, rejection_reason = ?3, updated_at = ?4 WHERE id = ?1",
                params![id.to_string(), status.as_str(), reason, Utc::now()],
            )?;
            query_news(conn, id)
        })
    }

    pub fn delete_news(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM news WHERE id = ?1", [id.to_string()])? > 0))
    }

    pub fn toggle_news_like(&self, news_id: Uuid, user_id: Uuid) -> Result<(bool, i64)> {
        toggle_like_in(self, "news_likes", "news_id", news_id, user_id)
    }

    pub fn news_likes(&self, news_id: Uuid, user_id: Uuid) -> Result<(i64, bool)> {
        self.with_conn(|conn| {
            let total = count(conn, "SELECT COUNT(*) FROM news_likes WHERE news_id = ?1", [news_id.to_string()])?;
            let mine = count(
                conn,
                "SELECT COUNT(*) FROM news_likes WHERE news_id = ?1 AND user_id = ?2",
                [news_id.to_string(), user_id.to_string()],
            )?;
            Ok((total as i64, mine > 0))
        })
    }

    // -- Comments --

    /// Oldest first.
    pub fn list_comments(&self, news_id: Uuid) -> Result<Vec<Comment>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.news_id = ?1 ORDER BY c.created_at ASC", comment_select());
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([news_id.to_string()], comment_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.with_conn(|conn| query_comment(conn, id))
    }

    pub fn create_comment(&self, news_id: Uuid, author: &User, content: &str) -> Result<Comment> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, news_id, author_id, content, iris_code, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id.to_string(),
                    news_id.to_string(),
                    author.id.to_string(),
                    content,
                    author.iris_code,
                    Utc::now(),
                ],
            )?;
            query_comment(conn, id)?.ok_or_else(|| anyhow::anyhow!("comment {} vanished after insert", id))
        })
    }

    pub fn update_comment(&self, id: Uuid, content: &str) -> Result<Option<Comment>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), content, Utc::now()],
            )?;
            query_comment(conn, id)
        })
    }

    pub fn delete_comment(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM comments WHERE id = ?1", [id.to_string()])? > 0))
    }

    pub fn toggle_comment_like(&self, comment_id: Uuid, user_id: Uuid) -> Result<(bool, i64)> {
        toggle_like_in(self, "comment_likes", "comment_id", comment_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;
    use quartier_types::models::Role;

    fn sample(db: &Database, author: &User) -> News {
        let tags = vec!["fete".to_string()];
        db.create_news(
            author,
            &NewNews {
                title: "Fête",
                content: "Samedi",
                tags: &tags,
                images: &[],
                published: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn news_starts_pending_and_can_be_moderated() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let news = sample(&db, &jane);
        assert_eq!(news.status, NewsStatus::Pending);
        assert_eq!(news.tags, vec!["fete".to_string()]);

        let rejected = db.set_news_status(news.id, NewsStatus::Rejected, Some("off topic")).unwrap().unwrap();
        assert_eq!(rejected.status, NewsStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("off topic"));

        let edited = db
            .update_news(news.id, &NewsChanges { title: Some("Fête du quartier".into()), ..Default::default() })
            .unwrap()
            .unwrap();
        assert_eq!(edited.status, NewsStatus::Pending);
        assert_eq!(edited.rejection_reason, None);
        assert_eq!(edited.content, "Samedi");
    }

    #[test]
    fn likes_toggle() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let paul = user(&db, "paul@example.org", Role::User, "750101");
        let news = sample(&db, &jane);

        assert_eq!(db.toggle_news_like(news.id, jane.id).unwrap(), (true, 1));
        assert_eq!(db.toggle_news_like(news.id, paul.id).unwrap(), (true, 2));
        assert_eq!(db.toggle_news_like(news.id, jane.id).unwrap(), (false, 1));
        assert_eq!(db.news_likes(news.id, paul.id).unwrap(), (1, true));
        assert_eq!(db.news_likes(news.id, jane.id).unwrap(), (1, false));
        assert_eq!(db.get_news(news.id).unwrap().unwrap().likes_count, 1);
    }

    #[test]
    fn comments_are_oldest_first_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let news = sample(&db, &jane);

        let first = db.create_comment(news.id, &jane, "un").unwrap();
        let second = db.create_comment(news.id, &jane, "deux").unwrap();
        let ids: Vec<Uuid> = db.list_comments(news.id).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        assert_eq!(db.toggle_comment_like(first.id, jane.id).unwrap(), (true, 1));
        assert_eq!(db.update_comment(first.id, "uno").unwrap().unwrap().content, "uno");

        assert!(db.delete_news(news.id).unwrap());
        assert!(db.get_comment(second.id).unwrap().is_none());
    }
}
