//! Row mapping helpers. Ids live in TEXT columns, timestamps in TEXT through
//! rusqlite's chrono support, and list-valued fields as JSON text.

use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use quartier_types::models::{Role, User, UserSummary};

/// Columns of a user row aliased as `u`, in the order [`user_at`] reads them.
pub const USER_COLUMNS: &str = "u.id, u.firstname, u.lastname, u.email, u.date_of_birth, \
     u.profile_picture, u.role, u.address, u.iris_code, u.iris_name, u.points, u.created_at";

/// Columns of a [`UserSummary`] for a users table aliased as `a`.
pub const AUTHOR_COLUMNS: &str = "a.id, a.firstname, a.lastname, a.profile_picture";

/// User row including the stored password hash. Only the auth handlers see it.
pub struct UserRow {
    pub user: User,
    pub password_hash: String,
}

pub struct NewUser<'a> {
    pub firstname: &'a str,
    pub lastname: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub date_of_birth: NaiveDate,
    pub role: Role,
    pub address: Option<&'a str>,
    pub iris_code: &'a str,
    pub iris_name: &'a str,
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

pub fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conversion_error(idx, format!("bad uuid '{}': {}", raw, e)))
}

pub fn opt_uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|e| conversion_error(idx, format!("bad uuid '{}': {}", raw, e)))
    })
    .transpose()
}

/// Read a text column into one of the text-backed enums.
pub fn parsed_at<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub fn json_list_at(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

pub fn json_list(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

/// Read four [`AUTHOR_COLUMNS`]-shaped columns starting at `start`.
pub fn summary_at(row: &Row, start: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: uuid_at(row, start)?,
        firstname: row.get(start + 1)?,
        lastname: row.get(start + 2)?,
        profile_picture: row.get(start + 3)?,
    })
}

/// Read [`USER_COLUMNS`] starting at `start`.
pub fn user_at(row: &Row, start: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, start)?,
        firstname: row.get(start + 1)?,
        lastname: row.get(start + 2)?,
        email: row.get(start + 3)?,
        date_of_birth: row.get(start + 4)?,
        profile_picture: row.get(start + 5)?,
        role: parsed_at(row, start + 6)?,
        address: row.get(start + 7)?,
        iris_code: row.get(start + 8)?,
        iris_name: row.get(start + 9)?,
        points: row.get(start + 10)?,
        created_at: row.get(start + 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn json_lists_round_trip_through_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        let images = vec!["/uploads/market/a.png".to_string(), "b \"quoted\"".to_string()];
        let back: Vec<String> = conn
            .query_row("SELECT ?1", [json_list(&images)], |row| json_list_at(row, 0))
            .unwrap();
        assert_eq!(back, images);
    }

    #[test]
    fn malformed_uuid_is_a_conversion_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .query_row("SELECT 'not-a-uuid'", [], |row| uuid_at(row, 0))
            .unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(0, _, _)));

        let none = conn
            .query_row("SELECT NULL", [], |row| opt_uuid_at(row, 0))
            .unwrap();
        assert_eq!(none, None);
    }
}
