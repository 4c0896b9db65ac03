use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::Event;
use quartier_types::models::{User, UserSummary};
use quartier_types::rules::Paging;

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, summary_at, uuid_at};
use crate::queries::{IrisScope, count};

pub struct NewEvent<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub place: &'a str,
    pub max_participants: Option<u32>,
}

#[derive(Debug, Default)]
pub struct EventChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub place: Option<String>,
    pub max_participants: Option<u32>,
}

/// Result of trying to join an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    NotFound,
    AlreadyStarted,
    AlreadyRegistered,
    Full,
}

fn event_select() -> String {
    format!(
        "SELECT e.id, e.name, e.description, e.start_date, e.end_date, e.place, e.max_participants,
                e.iris_code, e.iris_name, e.created_at, {}
         FROM events e JOIN users a ON a.id = e.author_id",
        AUTHOR_COLUMNS
    )
}

fn event_at(row: &Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        place: row.get(5)?,
        max_participants: row.get(6)?,
        iris_code: row.get(7)?,
        iris_name: row.get(8)?,
        created_at: row.get(9)?,
        author: summary_at(row, 10)?,
        participants: Vec::new(),
    })
}

fn participants(conn: &Connection, event_id: Uuid) -> Result<Vec<UserSummary>> {
    let sql = format!(
        "SELECT {} FROM event_participants p JOIN users a ON a.id = p.user_id
         WHERE p.event_id = ?1 ORDER BY p.joined_at",
        AUTHOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([event_id.to_string()], |row| summary_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn with_participants(conn: &Connection, mut events: Vec<Event>) -> Result<Vec<Event>> {
    for event in &mut events {
        event.participants = participants(conn, event.id)?;
    }
    Ok(events)
}

fn query_event(conn: &Connection, id: Uuid) -> Result<Option<Event>> {
    let sql = format!("{} WHERE e.id = ?1", event_select());
    let event = conn.query_row(&sql, [id.to_string()], event_at).optional()?;
    match event {
        Some(mut event) => {
            event.participants = participants(conn, id)?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

impl Database {
    /// Events that have not started yet, soonest first.
    pub fn list_upcoming_events(
        &self,
        scope: IrisScope<'_>,
        paging: Paging,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Event>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE (?1 IS NULL OR e.iris_code = ?1) AND e.start_date > ?2
                 ORDER BY e.start_date ASC LIMIT ?3 OFFSET ?4",
                event_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![scope, now, paging.limit, paging.offset()], event_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total = count(
                conn,
                "SELECT COUNT(*) FROM events e WHERE (?1 IS NULL OR e.iris_code = ?1) AND e.start_date > ?2",
                params![scope, now],
            )?;
            Ok((with_participants(conn, rows)?, total))
        })
    }

    /// Events `user_id` takes part in, newest first.
    pub fn events_of_participant(&self, user_id: Uuid) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} JOIN event_participants p ON p.event_id = e.id
                 WHERE p.user_id = ?1 ORDER BY e.start_date DESC",
                event_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], event_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            with_participants(conn, rows)
        })
    }

    pub fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        self.with_conn(|conn| query_event(conn, id))
    }

    pub fn create_event(&self, author: &User, new: &NewEvent<'_>) -> Result<Event> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, name, description, start_date, end_date, place, max_participants,
                                     author_id, iris_code, iris_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.to_string(),
                    new.name,
                    new.description,
                    new.start_date,
                    new.end_date,
                    new.place,
                    new.max_participants,
                    author.id.to_string(),
                    author.iris_code,
                    author.iris_name,
                    Utc::now(),
                ],
            )?;
            query_event(conn, id)?.ok_or_else(|| anyhow::anyhow!("event {} vanished after insert", id))
        })
    }

    pub fn update_event(&self, id: Uuid, changes: &EventChanges) -> Result<Option<Event>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE events SET
                    name             = COALESCE(?2, name),
                    description      = COALESCE(?3, description),
                    start_date       = COALESCE(?4, start_date),
                    end_date         = COALESCE(?5, end_date),
                    place            = COALESCE(?6, place),
                    max_participants = COALESCE(?7, max_participants)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    changes.name,
                    changes.description,
                    changes.start_date,
                    changes.end_date,
                    changes.place,
                    changes.max_participants,
                ],
            )?;
            query_event(conn, id)
        })
    }

    pub fn delete_event(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM events WHERE id = ?1", [id.to_string()])? > 0))
    }

    /// Capacity and duplicate checks run in the same transaction as the insert.
    pub fn register_to_event(&self, event_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<Registration> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let event: Option<(DateTime<Utc>, Option<u32>)> = tx
                .query_row(
                    "SELECT start_date, max_participants FROM events WHERE id = ?1",
                    [event_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((start_date, max_participants)) = event else {
                return Ok(Registration::NotFound);
            };
            if start_date <= now {
                return Ok(Registration::AlreadyStarted);
            }

            let already = count(
                &tx,
                "SELECT COUNT(*) FROM event_participants WHERE event_id = ?1 AND user_id = ?2",
                [event_id.to_string(), user_id.to_string()],
            )?;
            if already > 0 {
                return Ok(Registration::AlreadyRegistered);
            }

            if let Some(max) = max_participants {
                let taken = count(
                    &tx,
                    "SELECT COUNT(*) FROM event_participants WHERE event_id = ?1",
                    [event_id.to_string()],
                )?;
                if taken >= max as u64 {
                    return Ok(Registration::Full);
                }
            }

            tx.execute(
                "INSERT INTO event_participants (event_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![event_id.to_string(), user_id.to_string(), now],
            )?;
            tx.commit()?;
            Ok(Registration::Registered)
        })
    }

    pub fn unregister_from_event(&self, event_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM event_participants WHERE event_id = ?1 AND user_id = ?2",
                [event_id.to_string(), user_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }
}
