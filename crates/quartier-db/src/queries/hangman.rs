use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::{HangmanInvite, HangmanWord};
use quartier_types::models::InviteStatus;

use crate::Database;
use crate::models::{opt_uuid_at, parsed_at, summary_at, uuid_at};
use crate::queries::count;

/// Pending invites nobody answered are dropped after this long.
pub const PENDING_INVITE_TTL: Duration = Duration::minutes(5);

/// Accepted invites (finished or abandoned games) are dropped after this long.
pub const ACCEPTED_INVITE_TTL: Duration = Duration::hours(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordUpdate {
    Updated(HangmanWord),
    NotFound,
    /// The new spelling is already in the dictionary
    Taken,
}

const INVITE_SELECT: &str = "SELECT i.id, i.status, i.guesser_id, i.created_at, i.updated_at,
            s.id, s.firstname, s.lastname, s.profile_picture,
            r.id, r.firstname, r.lastname, r.profile_picture
     FROM hangman_invites i
     JOIN users s ON s.id = i.sender_id
     JOIN users r ON r.id = i.recipient_id";

fn invite_at(row: &Row) -> rusqlite::Result<HangmanInvite> {
    Ok(HangmanInvite {
        id: uuid_at(row, 0)?,
        status: parsed_at(row, 1)?,
        guesser_id: opt_uuid_at(row, 2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        sender: summary_at(row, 5)?,
        recipient: summary_at(row, 9)?,
    })
}

fn query_invite(conn: &Connection, id: Uuid) -> Result<Option<HangmanInvite>> {
    let sql = format!("{} WHERE i.id = ?1", INVITE_SELECT);
    Ok(conn.query_row(&sql, [id.to_string()], invite_at).optional()?)
}

fn word_at(row: &Row) -> rusqlite::Result<HangmanWord> {
    Ok(HangmanWord {
        word: row.get(0)?,
        difficulty: row.get(1)?,
    })
}

impl Database {
    // -- Dictionary --

    pub fn list_words(&self) -> Result<Vec<HangmanWord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT word, difficulty FROM hangman_words ORDER BY difficulty, word")?;
            let rows = stmt
                .query_map([], word_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn random_word(&self, difficulty: Option<u8>) -> Result<Option<HangmanWord>> {
        self.with_conn(|conn| {
            let word = conn
                .query_row(
                    "SELECT word, difficulty FROM hangman_words
                     WHERE ?1 IS NULL OR difficulty = ?1
                     ORDER BY RANDOM() LIMIT 1",
                    [difficulty],
                    word_at,
                )
                .optional()?;
            Ok(word)
        })
    }

    /// Returns `false` when the word already exists.
    pub fn add_word(&self, word: &str, difficulty: u8) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO hangman_words (word, difficulty) VALUES (?1, ?2)",
                params![word, difficulty],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn update_word(&self, old_word: &str, new_word: Option<&str>, difficulty: Option<u8>) -> Result<WordUpdate> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let current = tx
                .query_row(
                    "SELECT word, difficulty FROM hangman_words WHERE word = ?1",
                    [old_word],
                    word_at,
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(WordUpdate::NotFound);
            };

            let target = new_word.unwrap_or(current.word.as_str()).to_string();
            if target != current.word && count(&tx, "SELECT COUNT(*) FROM hangman_words WHERE word = ?1", [&target])? > 0 {
                return Ok(WordUpdate::Taken);
            }
            let difficulty = difficulty.unwrap_or(current.difficulty);
            tx.execute(
                "UPDATE hangman_words SET word = ?2, difficulty = ?3 WHERE word = ?1",
                params![old_word, target, difficulty],
            )?;
            tx.commit()?;
            Ok(WordUpdate::Updated(HangmanWord { word: target, difficulty }))
        })
    }

    pub fn delete_word(&self, word: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM hangman_words WHERE word = ?1", [word])? > 0))
    }

    // -- Invites --

    pub fn create_invite(&self, sender: Uuid, recipient: Uuid) -> Result<HangmanInvite> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO hangman_invites (id, sender_id, recipient_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id.to_string(),
                    sender.to_string(),
                    recipient.to_string(),
                    InviteStatus::Pending.as_str(),
                    Utc::now(),
                ],
            )?;
            query_invite(conn, id)?.ok_or_else(|| anyhow::anyhow!("invite {} vanished after insert", id))
        })
    }

    /// Whether a pending invite exists between the two users, in either direction.
    pub fn pending_invite_between(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = count(
                conn,
                "SELECT COUNT(*) FROM hangman_invites
                 WHERE status = 'pending'
                   AND ((sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1))",
                [a.to_string(), b.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    /// Pending invites received by `user_id`, newest first.
    pub fn pending_invites_for(&self, user_id: Uuid) -> Result<Vec<HangmanInvite>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE i.recipient_id = ?1 AND i.status = 'pending' ORDER BY i.created_at DESC",
                INVITE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], invite_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_invite(&self, id: Uuid) -> Result<Option<HangmanInvite>> {
        self.with_conn(|conn| query_invite(conn, id))
    }

    /// Move a pending invite to `status`. Returns `None` when the invite is
    /// missing or no longer pending.
    pub fn answer_invite(&self, id: Uuid, status: InviteStatus, guesser_id: Option<Uuid>) -> Result<Option<HangmanInvite>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE hangman_invites SET status = ?2, guesser_id = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), status.as_str(), guesser_id.map(|g| g.to_string()), Utc::now()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_invite(conn, id)
        })
    }

    /// Withdraw a pending invite. Returns `false` when it was not pending.
    pub fn cancel_invite(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM hangman_invites WHERE id = ?1 AND status = 'pending'",
                [id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    /// Drop stale pending invites, old accepted ones and every declined one.
    /// Returns the ids of the removed invites.
    pub fn purge_stale_invites(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM hangman_invites
                     WHERE status = 'declined'
                        OR (status = 'pending' AND created_at <= ?1)
                        OR (status = 'accepted' AND updated_at <= ?2)",
                )?;
                stmt.query_map(params![now - PENDING_INVITE_TTL, now - ACCEPTED_INVITE_TTL], |row| {
                    uuid_at(row, 0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };
            for id in &ids {
                tx.execute("DELETE FROM hangman_invites WHERE id = ?1", [id.to_string()])?;
            }
            tx.commit()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;
    use quartier_types::models::Role;

    #[test]
    fn dictionary_edits() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.list_words().unwrap().is_empty());

        assert!(db.add_word("lavoir", 2).unwrap());
        assert!(!db.add_word("lavoir", 3).unwrap());
        assert_eq!(db.random_word(Some(2)).unwrap().unwrap().difficulty, 2);

        assert_eq!(
            db.update_word("lavoir", Some("lavoirs"), None).unwrap(),
            WordUpdate::Updated(HangmanWord { word: "lavoirs".into(), difficulty: 2 })
        );
        assert_eq!(db.update_word("lavoirs", Some("maison"), None).unwrap(), WordUpdate::Taken);
        assert_eq!(db.update_word("absent", None, Some(1)).unwrap(), WordUpdate::NotFound);

        assert!(db.delete_word("lavoirs").unwrap());
        assert!(!db.delete_word("lavoirs").unwrap());
    }

    #[test]
    fn invite_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let paul = user(&db, "paul@example.org", Role::User, "750101");

        let invite = db.create_invite(jane.id, paul.id).unwrap();
        assert_eq!(invite.status, InviteStatus::Pending);
        assert!(db.pending_invite_between(paul.id, jane.id).unwrap());
        assert_eq!(db.pending_invites_for(paul.id).unwrap().len(), 1);
        assert!(db.pending_invites_for(jane.id).unwrap().is_empty());

        let accepted = db.answer_invite(invite.id, InviteStatus::Accepted, Some(paul.id)).unwrap().unwrap();
        assert_eq!(accepted.guesser_id, Some(paul.id));
        assert!(db.answer_invite(invite.id, InviteStatus::Declined, None).unwrap().is_none());
        assert!(!db.cancel_invite(invite.id).unwrap());
        assert!(!db.pending_invite_between(jane.id, paul.id).unwrap());
    }

    #[test]
    fn stale_invites_are_purged() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let paul = user(&db, "paul@example.org", Role::User, "750101");

        let pending = db.create_invite(jane.id, paul.id).unwrap();
        let declined = db.create_invite(paul.id, jane.id).unwrap();
        db.answer_invite(declined.id, InviteStatus::Declined, None).unwrap();

        let now = Utc::now();
        assert_eq!(db.purge_stale_invites(now).unwrap(), vec![declined.id]);
        assert!(db.get_invite(pending.id).unwrap().is_some());
        assert_eq!(db.purge_stale_invites(now + Duration::minutes(6)).unwrap(), vec![pending.id]);
        assert!(db.get_invite(pending.id).unwrap().is_none());
    }
}
