//! Queries grouped per feature. Every module adds methods to [`crate::Database`].

pub mod auth;
pub mod challenges;
pub mod chat;
pub mod events;
pub mod gallery;
pub mod hangman;
pub mod market;
pub mod news;
pub mod permissions;
pub mod polls;
pub mod posts;
pub mod reports;
pub mod shop;
pub mod users;

use anyhow::Result;
use rusqlite::{Connection, Params};

/// Run a `SELECT COUNT(*)` style query.
pub(crate) fn count(conn: &Connection, sql: &str, params: impl Params) -> Result<u64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(n as u64)
}

/// Listing filter: `Some(code)` keeps one neighborhood, `None` keeps all of them.
pub type IrisScope<'a> = Option<&'a str>;

/// Content that follows its author's neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrisBound {
    Posts,
    FlashPosts,
    Polls,
}

impl IrisBound {
    fn table(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::FlashPosts => "flash_posts",
            Self::Polls => "polls",
        }
    }
}

impl crate::Database {
    /// Delete rows whose author moved to another neighborhood. Rows tagged
    /// `all` stay.
    pub fn purge_iris_mismatches(&self, kind: IrisBound) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {table}
             WHERE iris_code <> 'all'
               AND iris_code <> (SELECT u.iris_code FROM users u WHERE u.id = {table}.author_id)",
            table = kind.table()
        );
        self.with_conn(|conn| Ok(conn.execute(&sql, [])?))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::NaiveDate;
    use quartier_types::models::{Role, User};

    use crate::Database;
    use crate::models::NewUser;

    pub fn user(db: &Database, email: &str, role: Role, iris: &str) -> User {
        db.create_user(&NewUser {
            firstname: "Test",
            lastname: email,
            email,
            password_hash: "hash",
            date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 17).unwrap(),
            role,
            address: None,
            iris_code: iris,
            iris_name: "Quartier",
        })
        .unwrap()
    }
}
