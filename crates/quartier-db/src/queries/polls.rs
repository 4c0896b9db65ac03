use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::{Poll, PollOption};
use quartier_types::models::{PollType, User};
use quartier_types::rules::{POLL_VOTE_POINTS, Paging, poll_is_closed};

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, parsed_at, summary_at, uuid_at};
use crate::queries::{IrisScope, count};

pub struct NewPoll<'a> {
    pub question: &'a str,
    pub poll_type: PollType,
    pub options: &'a [String],
    pub max_selections: Option<u32>,
    pub closes_at: Option<DateTime<Utc>>,
    pub iris_code: &'a str,
    pub iris_name: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Points credited to the voter
    Recorded(i64),
    NotFound,
    Closed,
    AlreadyVoted,
    UnknownOption,
}

fn poll_select() -> String {
    format!(
        "SELECT p.id, p.question, p.poll_type, p.max_selections, p.closes_at, p.manual_closed,
                p.iris_code, p.created_at, {}
         FROM polls p JOIN users a ON a.id = p.author_id",
        AUTHOR_COLUMNS
    )
}

fn poll_at(row: &Row, now: DateTime<Utc>) -> rusqlite::Result<Poll> {
    let closes_at: Option<DateTime<Utc>> = row.get(4)?;
    let manual_closed: bool = row.get(5)?;
    Ok(Poll {
        id: uuid_at(row, 0)?,
        question: row.get(1)?,
        poll_type: parsed_at(row, 2)?,
        max_selections: row.get(3)?,
        closes_at,
        closed: poll_is_closed(manual_closed, closes_at, now),
        iris_code: row.get(6)?,
        created_at: row.get(7)?,
        author: summary_at(row, 8)?,
        options: Vec::new(),
        total_voters: 0,
        has_voted: false,
    })
}

/// Fill options, vote counts and the viewer's participation.
fn hydrate(conn: &Connection, poll: &mut Poll, viewer: Uuid) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT o.id, o.label, (SELECT COUNT(*) FROM poll_votes v WHERE v.option_id = o.id)
         FROM poll_options o WHERE o.poll_id = ?1 ORDER BY o.position",
    )?;
    poll.options = stmt
        .query_map([poll.id.to_string()], |row| {
            Ok(PollOption {
                id: uuid_at(row, 0)?,
                label: row.get(1)?,
                votes_count: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    poll.total_voters = count(
        conn,
        "SELECT COUNT(DISTINCT user_id) FROM poll_votes WHERE poll_id = ?1",
        [poll.id.to_string()],
    )? as i64;
    poll.has_voted = count(
        conn,
        "SELECT COUNT(*) FROM poll_votes WHERE poll_id = ?1 AND user_id = ?2",
        [poll.id.to_string(), viewer.to_string()],
    )? > 0;
    Ok(())
}

fn query_poll(conn: &Connection, id: Uuid, viewer: Uuid, now: DateTime<Utc>) -> Result<Option<Poll>> {
    let sql = format!("{} WHERE p.id = ?1", poll_select());
    let poll = conn.query_row(&sql, [id.to_string()], |row| poll_at(row, now)).optional()?;
    match poll {
        Some(mut poll) => {
            hydrate(conn, &mut poll, viewer)?;
            Ok(Some(poll))
        }
        None => Ok(None),
    }
}

impl Database {
    /// Newest first. Polls tagged `all` show up in every neighborhood.
    pub fn list_polls(
        &self,
        scope: IrisScope<'_>,
        paging: Paging,
        viewer: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Poll>, u64)> {
        self.with_conn(|conn| {
            let filter = "?1 IS NULL OR p.iris_code = ?1 OR p.iris_code = 'all'";
            let sql = format!(
                "{} WHERE {} ORDER BY p.created_at DESC LIMIT ?2 OFFSET ?3",
                poll_select(),
                filter
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut polls = stmt
                .query_map(params![scope, paging.limit, paging.offset()], |row| poll_at(row, now))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for poll in &mut polls {
                hydrate(conn, poll, viewer)?;
            }
            let total = count(conn, &format!("SELECT COUNT(*) FROM polls p WHERE {}", filter), [scope])?;
            Ok((polls, total))
        })
    }

    pub fn get_poll(&self, id: Uuid, viewer: Uuid, now: DateTime<Utc>) -> Result<Option<Poll>> {
        self.with_conn(|conn| query_poll(conn, id, viewer, now))
    }

    pub fn create_poll(&self, author: &User, new: &NewPoll<'_>) -> Result<Poll> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO polls (id, question, poll_type, max_selections, closes_at, manual_closed,
                                    author_id, iris_code, iris_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9)",
                params![
                    id.to_string(),
                    new.question,
                    new.poll_type.as_str(),
                    new.max_selections,
                    new.closes_at,
                    author.id.to_string(),
                    new.iris_code,
                    new.iris_name,
                    now,
                ],
            )?;
            for (position, label) in new.options.iter().enumerate() {
                tx.execute(
                    "INSERT INTO poll_options (id, poll_id, label, position) VALUES (?1, ?2, ?3, ?4)",
                    params![Uuid::new_v4().to_string(), id.to_string(), label, position as i64],
                )?;
            }
            let poll = query_poll(&tx, id, author.id, now)?;
            tx.commit()?;
            poll.ok_or_else(|| anyhow::anyhow!("poll {} vanished after insert", id))
        })
    }

    /// Record a ballot and credit the voter, all or nothing. The ballot shape
    /// (count, duplicates, poll type) is checked by the caller.
    pub fn vote(&self, poll_id: Uuid, user_id: Uuid, option_ids: &[Uuid], now: DateTime<Utc>) -> Result<VoteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let state: Option<(bool, Option<DateTime<Utc>>)> = tx
                .query_row(
                    "SELECT manual_closed, closes_at FROM polls WHERE id = ?1",
                    [poll_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((manual_closed, closes_at)) = state else {
                return Ok(VoteOutcome::NotFound);
            };
            if poll_is_closed(manual_closed, closes_at, now) {
                return Ok(VoteOutcome::Closed);
            }

            let voted = count(
                &tx,
                "SELECT COUNT(*) FROM poll_votes WHERE poll_id = ?1 AND user_id = ?2",
                [poll_id.to_string(), user_id.to_string()],
            )?;
            if voted > 0 {
                return Ok(VoteOutcome::AlreadyVoted);
            }

            for option_id in option_ids {
                let belongs = count(
                    &tx,
                    "SELECT COUNT(*) FROM poll_options WHERE id = ?1 AND poll_id = ?2",
                    [option_id.to_string(), poll_id.to_string()],
                )?;
                if belongs == 0 {
                    return Ok(VoteOutcome::UnknownOption);
                }
                tx.execute(
                    "INSERT INTO poll_votes (poll_id, option_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![poll_id.to_string(), option_id.to_string(), user_id.to_string(), now],
                )?;
            }

            let points = POLL_VOTE_POINTS * option_ids.len() as i64;
            tx.execute(
                "UPDATE users SET points = points + ?2 WHERE id = ?1",
                params![user_id.to_string(), points],
            )?;
            tx.commit()?;
            Ok(VoteOutcome::Recorded(points))
        })
    }

    pub fn close_poll(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.execute("UPDATE polls SET manual_closed = 1 WHERE id = ?1", [id.to_string()])? > 0)
        })
    }

    pub fn delete_poll(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM polls WHERE id = ?1", [id.to_string()])? > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::IrisBound;
    use crate::queries::testing::user;
    use chrono::Duration;
    use quartier_types::models::{ALL_IRIS, Role};
    use quartier_types::rules::PageQuery;

    fn poll(db: &Database, author: &User, iris: &str, closes_at: Option<DateTime<Utc>>) -> Poll {
        let options = vec!["pizza".to_string(), "sushi".to_string(), "tacos".to_string()];
        db.create_poll(
            author,
            &NewPoll {
                question: "Repas de quartier ?",
                poll_type: PollType::Multiple,
                options: &options,
                max_selections: None,
                closes_at,
                iris_code: iris,
                iris_name: "Quartier",
            },
        )
        .unwrap()
    }

    #[test]
    fn vote_counts_and_points() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let paul = user(&db, "paul@example.org", Role::User, "750101");
        let p = poll(&db, &jane, "750101", None);
        let now = Utc::now();
        let (a, b) = (p.options[0].id, p.options[1].id);

        assert_eq!(db.vote(p.id, jane.id, &[a, b], now).unwrap(), VoteOutcome::Recorded(2));
        assert_eq!(db.vote(p.id, jane.id, &[a], now).unwrap(), VoteOutcome::AlreadyVoted);
        assert_eq!(db.vote(p.id, paul.id, &[a], now).unwrap(), VoteOutcome::Recorded(1));

        let seen = db.get_poll(p.id, paul.id, now).unwrap().unwrap();
        assert_eq!(seen.total_voters, 2);
        assert_eq!(seen.options[0].votes_count, 2);
        assert_eq!(seen.options[1].votes_count, 1);
        assert_eq!(seen.options[2].votes_count, 0);
        assert!(seen.has_voted);
        assert_eq!(db.get_user(jane.id).unwrap().unwrap().points, 2);
    }

    #[test]
    fn failed_ballot_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let p = poll(&db, &jane, "750101", None);
        let other = poll(&db, &jane, "750101", None);
        let now = Utc::now();

        let outcome = db.vote(p.id, jane.id, &[p.options[0].id, other.options[0].id], now).unwrap();
        assert_eq!(outcome, VoteOutcome::UnknownOption);
        let seen = db.get_poll(p.id, jane.id, now).unwrap().unwrap();
        assert_eq!(seen.options[0].votes_count, 0);
        assert!(!seen.has_voted);
        assert_eq!(db.get_user(jane.id).unwrap().unwrap().points, 0);
    }

    #[test]
    fn closed_polls_reject_votes() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let now = Utc::now();
        let expired = poll(&db, &jane, "750101", Some(now - Duration::minutes(1)));
        assert!(db.get_poll(expired.id, jane.id, now).unwrap().unwrap().closed);
        assert_eq!(db.vote(expired.id, jane.id, &[expired.options[0].id], now).unwrap(), VoteOutcome::Closed);

        let open = poll(&db, &jane, "750101", None);
        assert!(db.close_poll(open.id).unwrap());
        assert_eq!(db.vote(open.id, jane.id, &[open.options[0].id], now).unwrap(), VoteOutcome::Closed);
        assert_eq!(db.vote(Uuid::new_v4(), jane.id, &[], now).unwrap(), VoteOutcome::NotFound);
    }

    #[test]
    fn global_polls_are_listed_everywhere_and_survive_moves() {
        let db = Database::open_in_memory().unwrap();
        let admin = user(&db, "admin@example.org", Role::Admin, "690001");
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        poll(&db, &admin, ALL_IRIS, None);
        poll(&db, &jane, "750101", None);
        poll(&db, &admin, "690001", None);

        let (polls, total) = db
            .list_polls(Some("750101"), PageQuery::default().resolve(5), jane.id, Utc::now())
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(polls.len(), 2);

        db.set_address(admin.id, "x", "130001", "Marseille").unwrap();
        assert_eq!(db.purge_iris_mismatches(IrisBound::Polls).unwrap(), 1);
    }
}
