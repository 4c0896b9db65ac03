use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use quartier_db::Database;
use quartier_db::queries::IrisBound;
use quartier_gateway::Dispatcher;

/// Periodic maintenance work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupJob {
    /// Expired and revoked refresh tokens
    RefreshTokens,
    /// Expired restrictions, expired flash posts and content left behind by
    /// authors who moved to another neighborhood
    Content,
    /// Stale hangman invites
    HangmanInvites,
}

impl CleanupJob {
    pub const ALL: [CleanupJob; 3] = [Self::RefreshTokens, Self::Content, Self::HangmanInvites];

    pub fn period(&self) -> Duration {
        match self {
            Self::RefreshTokens => Duration::from_secs(24 * 60 * 60),
            Self::Content => Duration::from_secs(60 * 60),
            Self::HangmanInvites => Duration::from_secs(10 * 60),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::RefreshTokens => "refresh tokens",
            Self::Content => "content",
            Self::HangmanInvites => "hangman invites",
        }
    }
}

/// What one run removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Purged {
    pub rows: usize,
    /// Purged hangman invites, whose live rounds must go too
    pub invites: Vec<Uuid>,
}

/// Run one job now.
pub fn run_job(db: &Database, job: CleanupJob, now: DateTime<Utc>) -> anyhow::Result<Purged> {
    match job {
        CleanupJob::RefreshTokens => Ok(Purged {
            rows: db.purge_refresh_tokens(now)?,
            invites: Vec::new(),
        }),
        CleanupJob::Content => {
            let mut rows = db.purge_expired_restrictions(now)?;
            rows += db.purge_expired_flash_posts(now)?;
            for kind in [IrisBound::Posts, IrisBound::FlashPosts, IrisBound::Polls] {
                rows += db.purge_iris_mismatches(kind)?;
            }
            Ok(Purged { rows, invites: Vec::new() })
        }
        CleanupJob::HangmanInvites => {
            let invites = db.purge_stale_invites(now)?;
            Ok(Purged { rows: invites.len(), invites })
        }
    }
}

/// Forget the live rounds of purged invites.
pub async fn drop_games(dispatcher: &Dispatcher, invites: &[Uuid]) -> usize {
    let mut dropped = 0;
    for &invite_id in invites {
        if dispatcher.drop_game(invite_id).await {
            dropped += 1;
        }
    }
    dropped
}

/// Background task running `job` on its period. The first run happens
/// immediately.
pub async fn run_cleanup_loop(db: Arc<Database>, dispatcher: Dispatcher, job: CleanupJob) {
    let mut interval = tokio::time::interval(job.period());

    loop {
        interval.tick().await;

        let db = db.clone();
        let result = tokio::task::spawn_blocking(move || run_job(&db, job, Utc::now())).await;
        match result {
            Ok(Ok(purged)) => {
                if purged.rows > 0 {
                    info!("Cleanup: removed {} rows ({})", purged.rows, job.name());
                }
                let dropped = drop_games(&dispatcher, &purged.invites).await;
                if dropped > 0 {
                    debug!("Cleanup: dropped {} live hangman rounds", dropped);
                }
            }
            Ok(Err(e)) => warn!("Cleanup error ({}): {}", job.name(), e),
            Err(e) => warn!("Cleanup task failed ({}): {}", job.name(), e),
        }
    }
}

/// Start every cleanup loop on the current runtime.
pub fn spawn_all(db: Arc<Database>, dispatcher: Dispatcher) {
    for job in CleanupJob::ALL {
        tokio::spawn(run_cleanup_loop(db.clone(), dispatcher.clone(), job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use quartier_db::models::NewUser;
    use quartier_db::queries::hangman::ACCEPTED_INVITE_TTL;
    use quartier_types::models::{InviteStatus, Role, User};

    fn user(db: &Database, email: &str) -> User {
        db.create_user(&NewUser {
            firstname: "Nina",
            lastname: "Petit",
            email,
            password_hash: "x",
            date_of_birth: NaiveDate::from_ymd_opt(1988, 3, 2).unwrap(),
            role: Role::User,
            address: None,
            iris_code: "751010101",
            iris_name: "Saint-Germain",
        })
        .unwrap()
    }

    #[test]
    fn periods_follow_job_kind() {
        assert_eq!(CleanupJob::HangmanInvites.period(), Duration::from_secs(600));
        assert!(CleanupJob::Content.period() < CleanupJob::RefreshTokens.period());
    }

    #[test]
    fn refresh_token_job_removes_expired_tokens() {
        let db = Database::open_in_memory().unwrap();
        let u = user(&db, "nina@example.com");
        let now = Utc::now();
        db.insert_refresh_token(u.id, "expired", now - ChronoDuration::hours(1)).unwrap();
        db.insert_refresh_token(u.id, "live", now + ChronoDuration::days(7)).unwrap();

        assert_eq!(run_job(&db, CleanupJob::RefreshTokens, now).unwrap().rows, 1);
        assert_eq!(run_job(&db, CleanupJob::RefreshTokens, now).unwrap().rows, 0);
    }

    #[test]
    fn invite_job_removes_old_pending_invites() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        let invite = db.create_invite(a.id, b.id).unwrap();

        assert_eq!(run_job(&db, CleanupJob::HangmanInvites, Utc::now()).unwrap(), Purged::default());
        let later = Utc::now() + ChronoDuration::minutes(6);
        let purged = run_job(&db, CleanupJob::HangmanInvites, later).unwrap();
        assert_eq!(purged.rows, 1);
        assert_eq!(purged.invites, vec![invite.id]);
    }

    #[tokio::test]
    async fn purged_invites_release_their_live_rounds() {
        let db = Database::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        let invite = db.create_invite(a.id, b.id).unwrap();
        db.answer_invite(invite.id, InviteStatus::Accepted, Some(b.id)).unwrap();
        dispatcher.start_game(invite.id, a.id, b.id).await;

        let later = Utc::now() + ACCEPTED_INVITE_TTL + ChronoDuration::minutes(1);
        let purged = run_job(&db, CleanupJob::HangmanInvites, later).unwrap();
        assert_eq!(purged.invites, vec![invite.id]);
        assert_eq!(drop_games(&dispatcher, &purged.invites).await, 1);
        assert!(!dispatcher.has_game(invite.id).await);
    }

    #[test]
    fn content_job_runs_on_an_empty_database() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(run_job(&db, CleanupJob::Content, Utc::now()).unwrap().rows, 0);
    }
}
