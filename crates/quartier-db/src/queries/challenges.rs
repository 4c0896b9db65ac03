use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::{Challenge, ChallengeCompletion, ChallengeDetail};
use quartier_types::models::{CompletionStatus, User};
use quartier_types::rules::{CHALLENGE_COMPLETION_POINTS, Paging};

use crate::Database;
use crate::models::{AUTHOR_COLUMNS, parsed_at, summary_at, uuid_at};
use crate::queries::{IrisScope, count};

pub struct NewChallenge<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub success_criteria: &'a str,
}

#[derive(Debug, Default)]
pub struct ChallengeChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub success_criteria: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Subscribed,
    NotFound,
    Ended,
    AlreadySubscribed,
}

/// Result of reviewing a completion.
#[derive(Debug)]
pub enum Review {
    Reviewed(ChallengeCompletion),
    NotFound,
    /// The completion was already validated or rejected
    AlreadyReviewed(CompletionStatus),
}

fn challenge_select() -> String {
    format!(
        "SELECT c.id, c.title, c.description, c.start_date, c.end_date, c.success_criteria,
                c.iris_code, c.iris_name, c.created_at,
                (SELECT COUNT(*) FROM challenge_registrations r WHERE r.challenge_id = c.id),
                {}
         FROM challenges c JOIN users a ON a.id = c.author_id",
        AUTHOR_COLUMNS
    )
}

fn challenge_at(row: &Row) -> rusqlite::Result<Challenge> {
    Ok(Challenge {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        success_criteria: row.get(5)?,
        iris_code: row.get(6)?,
        iris_name: row.get(7)?,
        created_at: row.get(8)?,
        registrations_count: row.get(9)?,
        author: summary_at(row, 10)?,
    })
}

fn completion_select() -> String {
    format!(
        "SELECT k.id, k.challenge_id, k.text, k.image_url, k.status, k.rejection_reason, k.created_at, {}
         FROM challenge_completions k JOIN users a ON a.id = k.user_id",
        AUTHOR_COLUMNS
    )
}

fn completion_at(row: &Row) -> rusqlite::Result<ChallengeCompletion> {
    Ok(ChallengeCompletion {
        id: uuid_at(row, 0)?,
        challenge_id: uuid_at(row, 1)?,
        text: row.get(2)?,
        image_url: row.get(3)?,
        status: parsed_at(row, 4)?,
        rejection_reason: row.get(5)?,
        created_at: row.get(6)?,
        user: summary_at(row, 7)?,
    })
}

fn query_challenge(conn: &Connection, id: Uuid) -> Result<Option<Challenge>> {
    let sql = format!("{} WHERE c.id = ?1", challenge_select());
    Ok(conn.query_row(&sql, [id.to_string()], challenge_at).optional()?)
}

fn query_completion(conn: &Connection, id: Uuid) -> Result<Option<ChallengeCompletion>> {
    let sql = format!("{} WHERE k.id = ?1", completion_select());
    Ok(conn.query_row(&sql, [id.to_string()], completion_at).optional()?)
}

impl Database {
    /// Challenges that have not ended, latest end date first.
    pub fn list_active_challenges(
        &self,
        scope: IrisScope<'_>,
        paging: Paging,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Challenge>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE (?1 IS NULL OR c.iris_code = ?1) AND c.end_date > ?2
                 ORDER BY c.end_date DESC LIMIT ?3 OFFSET ?4",
                challenge_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![scope, now, paging.limit, paging.offset()], challenge_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total = count(
                conn,
                "SELECT COUNT(*) FROM challenges c WHERE (?1 IS NULL OR c.iris_code = ?1) AND c.end_date > ?2",
                params![scope, now],
            )?;
            Ok((rows, total))
        })
    }

    pub fn get_challenge(&self, id: Uuid) -> Result<Option<Challenge>> {
        self.with_conn(|conn| query_challenge(conn, id))
    }

    pub fn get_challenge_detail(&self, id: Uuid) -> Result<Option<ChallengeDetail>> {
        self.with_conn(|conn| {
            let Some(challenge) = query_challenge(conn, id)? else {
                return Ok(None);
            };

            let sql = format!(
                "SELECT {} FROM challenge_registrations r JOIN users a ON a.id = r.user_id
                 WHERE r.challenge_id = ?1 ORDER BY r.created_at",
                AUTHOR_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let registrations = stmt
                .query_map([id.to_string()], |row| summary_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let sql = format!("{} WHERE k.challenge_id = ?1 ORDER BY k.created_at", completion_select());
            let mut stmt = conn.prepare(&sql)?;
            let completions = stmt
                .query_map([id.to_string()], completion_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some(ChallengeDetail {
                challenge,
                registrations,
                completions,
            }))
        })
    }

    /// Challenges `user_id` registered to, most recent registration first.
    pub fn challenges_of_user(&self, user_id: Uuid) -> Result<Vec<Challenge>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} JOIN challenge_registrations r ON r.challenge_id = c.id
                 WHERE r.user_id = ?1 ORDER BY r.created_at DESC",
                challenge_select()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], challenge_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_challenge(&self, author: &User, new: &NewChallenge<'_>) -> Result<Challenge> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO challenges (id, title, description, start_date, end_date, success_criteria,
                                         author_id, iris_code, iris_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    new.title,
                    new.description,
                    new.start_date,
                    new.end_date,
                    new.success_criteria,
                    author.id.to_string(),
                    author.iris_code,
                    author.iris_name,
                    Utc::now(),
                ],
            )?;
            query_challenge(conn, id)?.ok_or_else(|| anyhow::anyhow!("challenge {} vanished after insert", id))
        })
    }

    pub fn update_challenge(&self, id: Uuid, changes: &ChallengeChanges) -> Result<Option<Challenge>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE challenges SET
                    title            = COALESCE(?2, title),
                    description      = COALESCE(?3, description),
                    start_date       = COALESCE(?4, start_date),
                    end_date         = COALESCE(?5, end_date),
                    success_criteria = COALESCE(?6, success_criteria)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    changes.title,
                    changes.description,
                    changes.start_date,
                    changes.end_date,
                    changes.success_criteria,
                ],
            )?;
            query_challenge(conn, id)
        })
    }

    pub fn delete_challenge(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM challenges WHERE id = ?1", [id.to_string()])? > 0))
    }

    pub fn subscribe_to_challenge(&self, challenge_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<Subscription> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let end_date: Option<DateTime<Utc>> = tx
                .query_row(
                    "SELECT end_date FROM challenges WHERE id = ?1",
                    [challenge_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(end_date) = end_date else {
                return Ok(Subscription::NotFound);
            };
            if end_date <= now {
                return Ok(Subscription::Ended);
            }
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO challenge_registrations (challenge_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![challenge_id.to_string(), user_id.to_string(), now],
            )?;
            tx.commit()?;
            Ok(if inserted == 0 { Subscription::AlreadySubscribed } else { Subscription::Subscribed })
        })
    }

    pub fn unsubscribe_from_challenge(&self, challenge_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM challenge_registrations WHERE challenge_id = ?1 AND user_id = ?2",
                [challenge_id.to_string(), user_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn is_registered_to_challenge(&self, challenge_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = count(
                conn,
                "SELECT COUNT(*) FROM challenge_registrations WHERE challenge_id = ?1 AND user_id = ?2",
                [challenge_id.to_string(), user_id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    /// Record a completion unless a pending or validated one already exists.
    /// Returns `None` in that case.
    pub fn create_completion(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
        text: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Option<ChallengeCompletion>> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let open = count(
                &tx,
                "SELECT COUNT(*) FROM challenge_completions
                 WHERE challenge_id = ?1 AND user_id = ?2 AND status IN ('PENDING', 'VALIDATED')",
                [challenge_id.to_string(), user_id.to_string()],
            )?;
            if open > 0 {
                return Ok(None);
            }
            let now = Utc::now();
            tx.execute(
                "INSERT INTO challenge_completions (id, challenge_id, user_id, text, image_url, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id.to_string(),
                    challenge_id.to_string(),
                    user_id.to_string(),
                    text,
                    image_url,
                    CompletionStatus::Pending.as_str(),
                    now,
                ],
            )?;
            let completion = query_completion(&tx, id)?;
            tx.commit()?;
            Ok(completion)
        })
    }

    pub fn get_completion(&self, id: Uuid) -> Result<Option<ChallengeCompletion>> {
        self.with_conn(|conn| query_completion(conn, id))
    }

    /// Validate or reject a pending completion. A review is final, so a
    /// completion credits its author at most once.
    pub fn review_completion(
        &self,
        id: Uuid,
        validated: bool,
        rejection_reason: Option<&str>,
    ) -> Result<Review> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let row: Option<(String, String)> = tx
                .query_row(
                    "SELECT user_id, status FROM challenge_completions WHERE id = ?1",
                    [id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((user_id, current)) = row else {
                return Ok(Review::NotFound);
            };
            let current: CompletionStatus = current.parse().map_err(anyhow::Error::msg)?;
            if current != CompletionStatus::Pending {
                return Ok(Review::AlreadyReviewed(current));
            }

            let (status, reason) = if validated {
                (CompletionStatus::Validated, None)
            } else {
                (CompletionStatus::Rejected, rejection_reason)
            };
            tx.execute(
                "UPDATE challenge_completions SET status = ?2, rejection_reason = ?3, updated_at = ?4 WHERE id = ?1",
                params![id.to_string(), status.as_str(), reason, Utc::now()],
            )?;

            if validated {
                tx.execute(
                    "UPDATE users SET points = points + ?2 WHERE id = ?1",
                    params![user_id, CHALLENGE_COMPLETION_POINTS],
                )?;
                tx.execute(
                    "UPDATE challenge_completions SET points_awarded = 1 WHERE id = ?1",
                    [id.to_string()],
                )?;
            }

            let completion = query_completion(&tx, id)?;
            tx.commit()?;
            Ok(completion.map_or(Review::NotFound, Review::Reviewed))
        })
    }
}
