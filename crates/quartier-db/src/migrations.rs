use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Permission codes a moderator can restrict, with a human description.
pub const PERMISSIONS: &[(&str, &str)] = &[
    ("publish_post", "Publish posts"),
    ("publish_flash_post", "Publish flash posts"),
    ("create_event", "Create events"),
    ("register_event", "Register to events"),
    ("publish_gallery", "Publish gallery pictures"),
    ("create_poll", "Create polls"),
    ("create_challenge", "Create challenges"),
    ("register_challenge", "Register to challenges"),
    ("send_report", "Send reports"),
    ("publish_market", "Publish market listings"),
    ("publish_news", "Publish news"),
];

const STARTER_WORDS: &[(&str, u8)] = &[
    ("maison", 1),
    ("jardin", 1),
    ("voisin", 1),
    ("quartier", 2),
    ("boulangerie", 2),
    ("bibliotheque", 3),
    ("arrondissement", 3),
];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id               TEXT PRIMARY KEY,
            firstname        TEXT NOT NULL,
            lastname         TEXT NOT NULL,
            email            TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password         TEXT NOT NULL,
            date_of_birth    TEXT NOT NULL,
            profile_picture  TEXT NOT NULL,
            role             TEXT NOT NULL DEFAULT 'user',
            address          TEXT,
            iris_code        TEXT NOT NULL,
            iris_name        TEXT NOT NULL,
            points           INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_iris ON users(iris_code);

        -- Friendships are stored in both directions
        CREATE TABLE IF NOT EXISTS friendships (
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            friend_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, friend_id)
        );

        CREATE TABLE IF NOT EXISTS friend_requests (
            sender_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            recipient_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at    TEXT NOT NULL,
            PRIMARY KEY (sender_id, recipient_id)
        );

        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_hash  TEXT NOT NULL UNIQUE,
            expires_at  TEXT NOT NULL,
            -- seconds between issue and expiry, carried across rotations
            lifetime_secs INTEGER NOT NULL,
            revoked     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS permissions (
            code         TEXT PRIMARY KEY,
            description  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_restrictions (
            id               TEXT PRIMARY KEY,
            user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            permission_code  TEXT NOT NULL REFERENCES permissions(code),
            reason           TEXT NOT NULL,
            restricted_by    TEXT NOT NULL,
            expires_at       TEXT NOT NULL,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_restrictions_user
            ON user_restrictions(user_id, permission_code);

        CREATE TABLE IF NOT EXISTS posts (
            id           TEXT PRIMARY KEY,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL,
            author_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            iris_code    TEXT NOT NULL,
            iris_name    TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS flash_posts (
            id           TEXT PRIMARY KEY,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL,
            author_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            iris_code    TEXT NOT NULL,
            iris_name    TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            expires_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS news (
            id                TEXT PRIMARY KEY,
            title             TEXT NOT NULL,
            content           TEXT NOT NULL,
            author_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            tags              TEXT NOT NULL DEFAULT '[]',
            images            TEXT NOT NULL DEFAULT '[]',
            published         INTEGER NOT NULL DEFAULT 1,
            status            TEXT NOT NULL DEFAULT 'PENDING',
            rejection_reason  TEXT,
            iris_code         TEXT NOT NULL,
            iris_name         TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS news_likes (
            news_id  TEXT NOT NULL REFERENCES news(id) ON DELETE CASCADE,
            user_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (news_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id          TEXT PRIMARY KEY,
            news_id     TEXT NOT NULL REFERENCES news(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            iris_code   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_comments_news ON comments(news_id, created_at);

        CREATE TABLE IF NOT EXISTS comment_likes (
            comment_id  TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (comment_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS events (
            id                TEXT PRIMARY KEY,
            name              TEXT NOT NULL,
            description       TEXT NOT NULL,
            start_date        TEXT NOT NULL,
            end_date          TEXT NOT NULL,
            place             TEXT NOT NULL,
            max_participants  INTEGER,
            author_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            iris_code         TEXT NOT NULL,
            iris_name         TEXT NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS event_participants (
            event_id   TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            joined_at  TEXT NOT NULL,
            PRIMARY KEY (event_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS challenges (
            id                TEXT PRIMARY KEY,
            title             TEXT NOT NULL,
            description       TEXT NOT NULL,
            start_date        TEXT NOT NULL,
            end_date          TEXT NOT NULL,
            success_criteria  TEXT NOT NULL,
            author_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            iris_code         TEXT NOT NULL,
            iris_name         TEXT NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS challenge_registrations (
            challenge_id  TEXT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
            user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at    TEXT NOT NULL,
            PRIMARY KEY (challenge_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS challenge_completions (
            id                TEXT PRIMARY KEY,
            challenge_id      TEXT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
            user_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            text              TEXT,
            image_url         TEXT,
            status            TEXT NOT NULL DEFAULT 'PENDING',
            rejection_reason  TEXT,
            points_awarded    INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS polls (
            id              TEXT PRIMARY KEY,
            question        TEXT NOT NULL,
            poll_type       TEXT NOT NULL,
            max_selections  INTEGER,
            closes_at       TEXT,
            manual_closed   INTEGER NOT NULL DEFAULT 0,
            author_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            iris_code       TEXT NOT NULL,
            iris_name       TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS poll_options (
            id        TEXT PRIMARY KEY,
            poll_id   TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            label     TEXT NOT NULL,
            position  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS poll_votes (
            poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            option_id   TEXT NOT NULL REFERENCES poll_options(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (option_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_poll_votes_poll ON poll_votes(poll_id, user_id);

        CREATE TABLE IF NOT EXISTS market_items (
            id             TEXT PRIMARY KEY,
            title          TEXT NOT NULL,
            description    TEXT NOT NULL,
            price          REAL,
            images         TEXT NOT NULL DEFAULT '[]',
            contact_email  TEXT NOT NULL,
            contact_phone  TEXT,
            author_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            iris_code      TEXT NOT NULL,
            iris_name      TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gallery_items (
            id           TEXT PRIMARY KEY,
            url          TEXT NOT NULL,
            description  TEXT,
            author_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            iris_code    TEXT NOT NULL,
            iris_name    TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gallery_likes (
            item_id  TEXT NOT NULL REFERENCES gallery_items(id) ON DELETE CASCADE,
            user_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (item_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS badges (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            image_url   TEXT NOT NULL,
            cost        INTEGER NOT NULL,
            available   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_badges (
            user_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            badge_id     TEXT NOT NULL REFERENCES badges(id) ON DELETE CASCADE,
            acquired_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, badge_id)
        );

        CREATE TABLE IF NOT EXISTS reports (
            id                TEXT PRIMARY KEY,
            reporter_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            reported_user_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            reason            TEXT NOT NULL,
            content_id        TEXT,
            content_type      TEXT,
            description       TEXT,
            status            TEXT NOT NULL DEFAULT 'PENDING',
            treated_by        TEXT REFERENCES users(id) ON DELETE SET NULL,
            iris_code         TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          TEXT PRIMARY KEY,
            room        TEXT NOT NULL,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_room
            ON chat_messages(room, created_at);

        CREATE TABLE IF NOT EXISTS chat_groups (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_by  TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_group_members (
            group_id   TEXT NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
            user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            joined_at  TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS hangman_words (
            word        TEXT PRIMARY KEY,
            difficulty  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hangman_invites (
            id            TEXT PRIMARY KEY,
            sender_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            recipient_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            status        TEXT NOT NULL DEFAULT 'pending',
            guesser_id    TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        ",
    )?;

    for (code, description) in PERMISSIONS {
        conn.execute(
            "INSERT OR IGNORE INTO permissions (code, description) VALUES (?1, ?2)",
            (code, description),
        )?;
    }

    // Only a fresh dictionary gets the starter words; admins own it afterwards
    let words: i64 = conn.query_row("SELECT COUNT(*) FROM hangman_words", [], |row| row.get(0))?;
    if words == 0 {
        for (word, difficulty) in STARTER_WORDS {
            conn.execute(
                "INSERT INTO hangman_words (word, difficulty) VALUES (?1, ?2)",
                (word, difficulty),
            )?;
        }
    }

    info!("Database migrations complete");
    Ok(())
}
