// SQLite persistence layer for users, follows, movies, reviews, watchlists,
// chats, messages, and per-role profiles.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    ActivityEntry, AdminProfile, ChatSummary, CuratorProfile, Message, Movie, PublicUser, Review,
    Role, SuspendedUser, User, ViewerProfile, WatchlistEntry,
};

/// SQLite-backed persistence. Array-valued fields (genre ids, profile lists)
/// are stored as JSON text columns.
pub struct Database {
    conn: Mutex<Connection>,
}

/// Fields required to create a user. The password arrives already hashed.
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub gender: String,
    pub role: Role,
    pub avatar_url: String,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT NOT NULL UNIQUE,
                email         TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                gender        TEXT NOT NULL,
                role          TEXT NOT NULL DEFAULT 'viewer',
                avatar_url    TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS follows (
                follower_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                following_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at   TEXT NOT NULL,
                PRIMARY KEY (follower_id, following_id)
            );

            CREATE TABLE IF NOT EXISTS movies (
                tmdb_id      TEXT PRIMARY KEY,
                title        TEXT NOT NULL,
                poster_path  TEXT,
                overview     TEXT,
                release_date TEXT,
                vote_average REAL,
                genre_ids    TEXT NOT NULL DEFAULT '[]',
                created_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watchlist (
                user_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                tmdb_id  TEXT NOT NULL REFERENCES movies(tmdb_id) ON DELETE CASCADE,
                added_at TEXT NOT NULL,
                PRIMARY KEY (user_id, tmdb_id)
            );

            CREATE TABLE IF NOT EXISTS reviews (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                movie_id     TEXT NOT NULL,
                movie_title  TEXT NOT NULL,
                user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                rating       INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                body         TEXT NOT NULL,
                movie_poster TEXT,
                created_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chats (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                user_a           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                user_b           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                latest_text      TEXT,
                latest_sender_id INTEGER,
                updated_at       TEXT NOT NULL,
                UNIQUE (user_a, user_b),
                CHECK (user_a < user_b)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id    INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                sender_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                body       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS viewer_profiles (
                user_id         INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                watchlist       TEXT NOT NULL DEFAULT '[]',
                favorite_genres TEXT NOT NULL DEFAULT '[]',
                reviews_count   INTEGER NOT NULL DEFAULT 0,
                watched_movies  TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS curator_profiles (
                user_id         INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                curated_lists   TEXT NOT NULL DEFAULT '[]',
                recommendations TEXT NOT NULL DEFAULT '[]',
                expertise       TEXT NOT NULL DEFAULT '[]',
                followers_count INTEGER NOT NULL DEFAULT 0,
                lists_count     INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS admin_profiles (
                user_id          INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                permissions      TEXT NOT NULL DEFAULT '[]',
                moderation_level TEXT NOT NULL DEFAULT 'basic',
                last_login       TEXT,
                last_moderation  TEXT,
                reports_handled  INTEGER NOT NULL DEFAULT 0,
                users_managed    INTEGER NOT NULL DEFAULT 0,
                suspended_users  TEXT NOT NULL DEFAULT '[]',
                activity_log     TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_reviews_movie ON reviews(movie_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_user ON reviews(user_id);
            CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO users (name, email, password_hash, gender, role, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.name,
                new.email,
                new.password_hash,
                new.gender,
                new.role.as_str(),
                new.avatar_url,
                now.to_rfc3339(),
            ],
        )
        .context("failed to insert user")?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_user(id)?
            .ok_or_else(|| anyhow!("user {id} missing immediately after insert"))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, email, password_hash, gender, role, avatar_url, created_at
             FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()
        .context("failed to query user by id")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, email, password_hash, gender, role, avatar_url, created_at
             FROM users WHERE email = ?1",
            params![email],
            user_from_row,
        )
        .optional()
        .context("failed to query user by email")
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        self.exists("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)", email)
    }

    pub fn name_exists(&self, name: &str) -> Result<bool> {
        self.exists("SELECT EXISTS(SELECT 1 FROM users WHERE name = ?1)", name)
    }

    fn exists(&self, sql: &str, value: &str) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(sql, params![value], |row| row.get(0))
            .context("failed to run existence check")
    }

    /// All users whose name (or, when `include_email`, email) contains
    /// `search` case-insensitively. `exclude_id` drops the requester from
    /// the results. An empty search matches everyone.
    pub fn search_users(
        &self,
        search: &str,
        exclude_id: Option<i64>,
        include_email: bool,
    ) -> Result<Vec<User>> {
        let conn = self.conn();
        let pattern = format!("%{}%", escape_like(search));
        let sql = if include_email {
            "SELECT id, name, email, password_hash, gender, role, avatar_url, created_at
             FROM users
             WHERE (name LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\')
               AND (?2 IS NULL OR id != ?2)
             ORDER BY name"
        } else {
            "SELECT id, name, email, password_hash, gender, role, avatar_url, created_at
             FROM users
             WHERE name LIKE ?1 ESCAPE '\\'
               AND (?2 IS NULL OR id != ?2)
             ORDER BY name"
        };
        let mut stmt = conn.prepare(sql).context("failed to prepare user search")?;
        let users = stmt
            .query_map(params![pattern, exclude_id], user_from_row)
            .context("failed to search users")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map user rows")?;
        Ok(users)
    }

    /// Update display name and/or avatar. `None` leaves a field unchanged.
    pub fn update_profile(
        &self,
        id: i64,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE users SET
                name = COALESCE(?2, name),
                avatar_url = COALESCE(?3, avatar_url)
             WHERE id = ?1",
            params![id, name, avatar_url],
        )
        .context("failed to update profile")?;
        Ok(())
    }

    pub fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![id, password_hash],
        )
        .context("failed to update password")?;
        Ok(())
    }

    /// Set a user's role. Returns the updated user, or `None` when absent.
    pub fn update_role(&self, id: i64, role: Role) -> Result<Option<User>> {
        let changed = {
            let conn = self.conn();
            conn.execute(
                "UPDATE users SET role = ?2 WHERE id = ?1",
                params![id, role.as_str()],
            )
            .context("failed to update role")?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_user(id)
    }

    /// Delete a user. Dependent rows (follows, reviews, watchlist, chats,
    /// messages, profiles) go with it via ON DELETE CASCADE. Returns `false`
    /// when the user did not exist.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .context("failed to delete user")?;
        Ok(changed > 0)
    }

    /// Minimal public info for one user, with follower/following counts.
    pub fn public_user(&self, id: i64) -> Result<Option<PublicUser>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT u.id, u.name, u.avatar_url, {FOLLOW_COUNTS}
                 FROM users u WHERE u.id = ?1"
            ),
            params![id],
            public_user_from_row,
        )
        .optional()
        .context("failed to query public user")
    }

    /// Public-search listing: name substring match only, public fields only.
    pub fn search_public_users(&self, search: &str) -> Result<Vec<PublicUser>> {
        let conn = self.conn();
        let pattern = format!("%{}%", escape_like(search));
        let mut stmt = conn
            .prepare(&format!(
                "SELECT u.id, u.name, u.avatar_url, {FOLLOW_COUNTS}
                 FROM users u WHERE u.name LIKE ?1 ESCAPE '\\' ORDER BY u.name"
            ))
            .context("failed to prepare public search")?;
        let users = stmt
            .query_map(params![pattern], public_user_from_row)
            .context("failed to search public users")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map public user rows")?;
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Follows
    // ------------------------------------------------------------------

    pub fn is_following(&self, follower: i64, following: i64) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2)",
            params![follower, following],
            |row| row.get(0),
        )
        .context("failed to check follow")
    }

    pub fn follow(&self, follower: i64, following: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO follows (follower_id, following_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![follower, following, Utc::now().to_rfc3339()],
        )
        .context("failed to insert follow")?;
        Ok(())
    }

    pub fn unfollow(&self, follower: i64, following: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower, following],
        )
        .context("failed to delete follow")?;
        Ok(())
    }

    /// Ids of users who follow `user`.
    pub fn follower_ids(&self, user: i64) -> Result<Vec<i64>> {
        self.id_list(
            "SELECT follower_id FROM follows WHERE following_id = ?1 ORDER BY follower_id",
            user,
        )
    }

    /// Ids of users `user` follows.
    pub fn following_ids(&self, user: i64) -> Result<Vec<i64>> {
        self.id_list(
            "SELECT following_id FROM follows WHERE follower_id = ?1 ORDER BY following_id",
            user,
        )
    }

    fn id_list(&self, sql: &str, user: i64) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).context("failed to prepare id list")?;
        let ids = stmt
            .query_map(params![user], |row| row.get(0))
            .context("failed to query id list")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map id list")?;
        Ok(ids)
    }

    pub fn followers_of(&self, user: i64) -> Result<Vec<PublicUser>> {
        self.follow_user_list(
            "SELECT u.id, u.name, u.avatar_url, {counts}
             FROM follows f JOIN users u ON u.id = f.follower_id
             WHERE f.following_id = ?1 ORDER BY u.name",
            user,
        )
    }

    pub fn followings_of(&self, user: i64) -> Result<Vec<PublicUser>> {
        self.follow_user_list(
            "SELECT u.id, u.name, u.avatar_url, {counts}
             FROM follows f JOIN users u ON u.id = f.following_id
             WHERE f.follower_id = ?1 ORDER BY u.name",
            user,
        )
    }

    fn follow_user_list(&self, sql_template: &str, user: i64) -> Result<Vec<PublicUser>> {
        let conn = self.conn();
        let sql = sql_template.replace("{counts}", FOLLOW_COUNTS);
        let mut stmt = conn
            .prepare(&sql)
            .context("failed to prepare follow list")?;
        let users = stmt
            .query_map(params![user], public_user_from_row)
            .context("failed to query follow list")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map follow list")?;
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Movies and watchlists
    // ------------------------------------------------------------------

    /// Insert or refresh a cached movie record. Metadata fetched from TMDB
    /// overwrites prior values; the cache always reflects the latest fetch.
    pub fn upsert_movie(&self, movie: &Movie) -> Result<()> {
        let conn = self.conn();
        let genre_ids =
            serde_json::to_string(&movie.genre_ids).context("failed to serialize genre ids")?;
        conn.execute(
            "INSERT INTO movies (tmdb_id, title, poster_path, overview, release_date, vote_average, genre_ids, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tmdb_id) DO UPDATE SET
                title        = excluded.title,
                poster_path  = excluded.poster_path,
                overview     = excluded.overview,
                release_date = excluded.release_date,
                vote_average = excluded.vote_average,
                genre_ids    = excluded.genre_ids",
            params![
                movie.tmdb_id,
                movie.title,
                movie.poster_path,
                movie.overview,
                movie.release_date,
                movie.vote_average,
                genre_ids,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("failed to upsert movie")?;
        Ok(())
    }

    pub fn get_movie(&self, tmdb_id: &str) -> Result<Option<Movie>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT tmdb_id, title, poster_path, overview, release_date, vote_average, genre_ids
             FROM movies WHERE tmdb_id = ?1",
            params![tmdb_id],
            movie_from_row,
        )
        .optional()
        .context("failed to query movie")
    }

    /// Add a movie to a user's watchlist. Returns `false` when it was
    /// already there.
    pub fn watchlist_add(&self, user: i64, tmdb_id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO watchlist (user_id, tmdb_id, added_at)
                 VALUES (?1, ?2, ?3)",
                params![user, tmdb_id, Utc::now().to_rfc3339()],
            )
            .context("failed to add to watchlist")?;
        Ok(changed > 0)
    }

    pub fn watchlist_remove(&self, user: i64, tmdb_id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "DELETE FROM watchlist WHERE user_id = ?1 AND tmdb_id = ?2",
                params![user, tmdb_id],
            )
            .context("failed to remove from watchlist")?;
        Ok(changed > 0)
    }

    /// The user's watchlisted movies, most recently added first.
    pub fn watchlist_of(&self, user: i64) -> Result<Vec<Movie>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT m.tmdb_id, m.title, m.poster_path, m.overview, m.release_date, m.vote_average, m.genre_ids
                 FROM watchlist w JOIN movies m ON m.tmdb_id = w.tmdb_id
                 WHERE w.user_id = ?1 ORDER BY w.added_at DESC, m.tmdb_id",
            )
            .context("failed to prepare watchlist query")?;
        let movies = stmt
            .query_map(params![user], movie_from_row)
            .context("failed to query watchlist")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map watchlist rows")?;
        Ok(movies)
    }

    // ------------------------------------------------------------------
    // Reviews
    // ------------------------------------------------------------------

    pub fn insert_review(
        &self,
        user: i64,
        movie_id: &str,
        movie_title: &str,
        rating: u8,
        body: &str,
        movie_poster: Option<&str>,
    ) -> Result<Review> {
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO reviews (movie_id, movie_title, user_id, rating, body, movie_poster, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    movie_id,
                    movie_title,
                    user,
                    rating,
                    body,
                    movie_poster,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("failed to insert review")?;
            conn.last_insert_rowid()
        };
        self.get_review(id)?
            .ok_or_else(|| anyhow!("review {id} missing immediately after insert"))
    }

    pub fn get_review(&self, id: i64) -> Result<Option<Review>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT r.id, r.movie_id, r.movie_title, r.rating, r.body, r.movie_poster, r.created_at,
                        u.id, u.name, u.avatar_url, {FOLLOW_COUNTS}
                 FROM reviews r JOIN users u ON u.id = r.user_id
                 WHERE r.id = ?1"
            ),
            params![id],
            review_from_row,
        )
        .optional()
        .context("failed to query review")
    }

    /// Reviews of a movie, newest first.
    pub fn reviews_for_movie(&self, movie_id: &str) -> Result<Vec<Review>> {
        self.review_list(
            "WHERE r.movie_id = ?1 ORDER BY r.created_at DESC, r.id DESC",
            ReviewKey::Movie(movie_id),
        )
    }

    /// Reviews written by a user, newest first.
    pub fn reviews_by_user(&self, user: i64) -> Result<Vec<Review>> {
        self.review_list(
            "WHERE r.user_id = ?1 ORDER BY r.created_at DESC, r.id DESC",
            ReviewKey::User(user),
        )
    }

    fn review_list(&self, tail: &str, key: ReviewKey<'_>) -> Result<Vec<Review>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT r.id, r.movie_id, r.movie_title, r.rating, r.body, r.movie_poster, r.created_at,
                    u.id, u.name, u.avatar_url, {FOLLOW_COUNTS}
             FROM reviews r JOIN users u ON u.id = r.user_id {tail}"
        );
        let mut stmt = conn
            .prepare(&sql)
            .context("failed to prepare review list")?;
        let rows = match key {
            ReviewKey::Movie(movie_id) => stmt.query_map(params![movie_id], review_from_row),
            ReviewKey::User(user) => stmt.query_map(params![user], review_from_row),
        }
        .context("failed to query reviews")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map review rows")
    }

    /// Update a review's rating and/or body. `None` leaves a field unchanged.
    pub fn update_review(&self, id: i64, rating: Option<u8>, body: Option<&str>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE reviews SET
                rating = COALESCE(?2, rating),
                body = COALESCE(?3, body)
             WHERE id = ?1",
            params![id, rating, body],
        )
        .context("failed to update review")?;
        Ok(())
    }

    pub fn delete_review(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM reviews WHERE id = ?1", params![id])
            .context("failed to delete review")?;
        Ok(changed > 0)
    }

    // ------------------------------------------------------------------
    // Chats and messages
    // ------------------------------------------------------------------

    /// Find or create the single chat between two users. The pair is
    /// normalized (smaller id first) so (a, b) and (b, a) map to one row.
    pub fn get_or_create_chat(&self, a: i64, b: i64) -> Result<i64> {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO chats (user_a, user_b, updated_at) VALUES (?1, ?2, ?3)",
            params![lo, hi, Utc::now().to_rfc3339()],
        )
        .context("failed to create chat")?;
        conn.query_row(
            "SELECT id FROM chats WHERE user_a = ?1 AND user_b = ?2",
            params![lo, hi],
            |row| row.get(0),
        )
        .context("failed to look up chat")
    }

    /// Both participants of a chat, or `None` when the chat does not exist.
    pub fn chat_participants(&self, chat_id: i64) -> Result<Option<(i64, i64)>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_a, user_b FROM chats WHERE id = ?1",
            params![chat_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("failed to query chat participants")
    }

    /// Store a message and refresh the chat's latest-message fields in one
    /// transaction.
    pub fn insert_message(&self, chat_id: i64, sender: i64, body: &str) -> Result<Message> {
        let mut conn = self.conn();
        let now = Utc::now();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "INSERT INTO messages (chat_id, sender_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, sender, body, now.to_rfc3339()],
        )
        .context("failed to insert message")?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE chats SET latest_text = ?2, latest_sender_id = ?3, updated_at = ?4
             WHERE id = ?1",
            params![chat_id, body, sender, now.to_rfc3339()],
        )
        .context("failed to update chat latest message")?;
        tx.commit().context("failed to commit message")?;
        Ok(Message {
            id,
            chat_id,
            sender_id: sender,
            body: body.to_string(),
            created_at: now,
        })
    }

    /// All chats of a user with the other participant's public info, most
    /// recently active first.
    pub fn chats_of(&self, user: i64) -> Result<Vec<ChatSummary>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT c.id, c.latest_text, c.latest_sender_id, c.updated_at,
                        u.id, u.name, u.avatar_url, {FOLLOW_COUNTS}
                 FROM chats c
                 JOIN users u ON u.id = CASE WHEN c.user_a = ?1 THEN c.user_b ELSE c.user_a END
                 WHERE c.user_a = ?1 OR c.user_b = ?1
                 ORDER BY c.updated_at DESC, c.id DESC"
            ))
            .context("failed to prepare chat list")?;
        let chats = stmt
            .query_map(params![user], |row| {
                Ok(ChatSummary {
                    id: row.get(0)?,
                    latest_text: row.get(1)?,
                    latest_sender_id: row.get(2)?,
                    updated_at: timestamp(row, 3)?,
                    other: PublicUser {
                        id: row.get(4)?,
                        name: row.get(5)?,
                        avatar_url: row.get(6)?,
                        followers_count: row.get(7)?,
                        followings_count: row.get(8)?,
                    },
                })
            })
            .context("failed to query chats")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map chat rows")?;
        Ok(chats)
    }

    /// Messages of a chat, oldest first.
    pub fn messages_of(&self, chat_id: i64) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, chat_id, sender_id, body, created_at
                 FROM messages WHERE chat_id = ?1 ORDER BY created_at, id",
            )
            .context("failed to prepare message list")?;
        let messages = stmt
            .query_map(params![chat_id], |row| {
                Ok(Message {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    body: row.get(3)?,
                    created_at: timestamp(row, 4)?,
                })
            })
            .context("failed to query messages")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map message rows")?;
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Role profiles
    // ------------------------------------------------------------------

    /// Create a viewer profile with the default empty fields. Returns
    /// `false` when the user already has one.
    pub fn create_viewer_profile(&self, user: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO viewer_profiles (user_id) VALUES (?1)",
                params![user],
            )
            .context("failed to create viewer profile")?;
        Ok(changed > 0)
    }

    pub fn get_viewer_profile(&self, user: i64) -> Result<Option<ViewerProfile>> {
        Self::query_viewer_profile(&self.conn(), user)
    }

    fn query_viewer_profile(conn: &Connection, user: i64) -> Result<Option<ViewerProfile>> {
        conn.query_row(
            "SELECT user_id, watchlist, favorite_genres, reviews_count, watched_movies
             FROM viewer_profiles WHERE user_id = ?1",
            params![user],
            |row| {
                Ok(ViewerProfile {
                    user_id: row.get(0)?,
                    watchlist: json_column(row, 1)?,
                    favorite_genres: json_column(row, 2)?,
                    reviews_count: row.get(3)?,
                    watched_movies: json_column(row, 4)?,
                })
            },
        )
        .optional()
        .context("failed to query viewer profile")
    }

    /// Append an entry to the viewer profile's watchlist. Returns the
    /// updated profile, or `None` when the profile does not exist. The read
    /// and the update share one connection guard, so a concurrent append
    /// cannot overwrite this one.
    pub fn viewer_watchlist_add(
        &self,
        user: i64,
        entry: &WatchlistEntry,
    ) -> Result<Option<ViewerProfile>> {
        let conn = self.conn();
        let Some(mut profile) = Self::query_viewer_profile(&conn, user)? else {
            return Ok(None);
        };
        profile.watchlist.push(entry.clone());
        let json =
            serde_json::to_string(&profile.watchlist).context("failed to serialize watchlist")?;
        conn.execute(
            "UPDATE viewer_profiles SET watchlist = ?2 WHERE user_id = ?1",
            params![user, json],
        )
        .context("failed to update viewer watchlist")?;
        Ok(Some(profile))
    }

    pub fn create_curator_profile(&self, user: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO curator_profiles (user_id) VALUES (?1)",
                params![user],
            )
            .context("failed to create curator profile")?;
        Ok(changed > 0)
    }

    pub fn get_curator_profile(&self, user: i64) -> Result<Option<CuratorProfile>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_id, curated_lists, recommendations, expertise, followers_count, lists_count
             FROM curator_profiles WHERE user_id = ?1",
            params![user],
            |row| {
                Ok(CuratorProfile {
                    user_id: row.get(0)?,
                    curated_lists: json_column(row, 1)?,
                    recommendations: json_column(row, 2)?,
                    expertise: json_column(row, 3)?,
                    followers_count: row.get(4)?,
                    lists_count: row.get(5)?,
                })
            },
        )
        .optional()
        .context("failed to query curator profile")
    }

    /// Replace the curator's expertise list. Returns the updated profile,
    /// or `None` when the profile does not exist.
    pub fn set_curator_expertise(
        &self,
        user: i64,
        expertise: &[String],
    ) -> Result<Option<CuratorProfile>> {
        let json = serde_json::to_string(expertise).context("failed to serialize expertise")?;
        let changed = {
            let conn = self.conn();
            conn.execute(
                "UPDATE curator_profiles SET expertise = ?2 WHERE user_id = ?1",
                params![user, json],
            )
            .context("failed to update expertise")?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_curator_profile(user)
    }

    /// Create an admin profile with the original's default permissions.
    pub fn create_admin_profile(&self, user: i64) -> Result<bool> {
        let permissions = serde_json::to_string(&["view_reports", "moderate_content"])
            .context("failed to serialize default permissions")?;
        let conn = self.conn();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO admin_profiles (user_id, permissions, last_login)
                 VALUES (?1, ?2, ?3)",
                params![user, permissions, Utc::now().to_rfc3339()],
            )
            .context("failed to create admin profile")?;
        Ok(changed > 0)
    }

    pub fn get_admin_profile(&self, user: i64) -> Result<Option<AdminProfile>> {
        Self::query_admin_profile(&self.conn(), user)
    }

    fn query_admin_profile(conn: &Connection, user: i64) -> Result<Option<AdminProfile>> {
        conn.query_row(
            "SELECT user_id, permissions, moderation_level, last_login, last_moderation,
                    reports_handled, users_managed, suspended_users, activity_log
             FROM admin_profiles WHERE user_id = ?1",
            params![user],
            |row| {
                Ok(AdminProfile {
                    user_id: row.get(0)?,
                    permissions: json_column(row, 1)?,
                    moderation_level: row.get(2)?,
                    last_login: optional_timestamp(row, 3)?,
                    last_moderation: optional_timestamp(row, 4)?,
                    reports_handled: row.get(5)?,
                    users_managed: row.get(6)?,
                    suspended_users: json_column::<Vec<SuspendedUser>>(row, 7)?,
                    activity_log: json_column::<Vec<ActivityEntry>>(row, 8)?,
                })
            },
        )
        .optional()
        .context("failed to query admin profile")
    }

    /// Append an activity-log entry and refresh `last_moderation`. Returns
    /// the updated profile, or `None` when the profile does not exist. Read
    /// and update share one connection guard, as in `viewer_watchlist_add`.
    pub fn admin_log_activity(
        &self,
        user: i64,
        entry: &ActivityEntry,
    ) -> Result<Option<AdminProfile>> {
        let conn = self.conn();
        let Some(mut profile) = Self::query_admin_profile(&conn, user)? else {
            return Ok(None);
        };
        profile.activity_log.push(entry.clone());
        profile.last_moderation = Some(entry.timestamp);
        let json = serde_json::to_string(&profile.activity_log)
            .context("failed to serialize activity log")?;
        conn.execute(
            "UPDATE admin_profiles SET activity_log = ?2, last_moderation = ?3
             WHERE user_id = ?1",
            params![user, json, entry.timestamp.to_rfc3339()],
        )
        .context("failed to update activity log")?;
        Ok(Some(profile))
    }
}

enum ReviewKey<'a> {
    Movie(&'a str),
    User(i64),
}

/// Follower/following count subqueries, shared by every PublicUser query.
const FOLLOW_COUNTS: &str = "(SELECT COUNT(*) FROM follows WHERE following_id = u.id),
     (SELECT COUNT(*) FROM follows WHERE follower_id = u.id)";

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        gender: row.get(4)?,
        role: Role::parse(&role_str).unwrap_or_default(),
        avatar_url: row.get(6)?,
        created_at: timestamp(row, 7)?,
    })
}

fn public_user_from_row(row: &Row<'_>) -> rusqlite::Result<PublicUser> {
    Ok(PublicUser {
        id: row.get(0)?,
        name: row.get(1)?,
        avatar_url: row.get(2)?,
        followers_count: row.get(3)?,
        followings_count: row.get(4)?,
    })
}

fn movie_from_row(row: &Row<'_>) -> rusqlite::Result<Movie> {
    Ok(Movie {
        tmdb_id: row.get(0)?,
        title: row.get(1)?,
        poster_path: row.get(2)?,
        overview: row.get(3)?,
        release_date: row.get(4)?,
        vote_average: row.get(5)?,
        genre_ids: json_column(row, 6)?,
    })
}

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        movie_id: row.get(1)?,
        movie_title: row.get(2)?,
        rating: row.get(3)?,
        body: row.get(4)?,
        movie_poster: row.get(5)?,
        created_at: timestamp(row, 6)?,
        user: PublicUser {
            id: row.get(7)?,
            name: row.get(8)?,
            avatar_url: row.get(9)?,
            followers_count: row.get(10)?,
            followings_count: row.get(11)?,
        },
    })
}

/// Parse a JSON text column into the target type. An invalid column is a
/// programming error surfaced as a rusqlite conversion failure.
fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let json: String = row.get(idx)?;
    serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    match text {
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
        None => Ok(None),
    }
}

/// Escape LIKE wildcards in user-supplied search text.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    /// Helper: insert a user with sensible defaults.
    fn add_user(db: &Database, name: &str) -> User {
        db.create_user(&NewUser {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "$2b$04$fakehash".to_string(),
            gender: "other".to_string(),
            role: Role::Viewer,
            avatar_url: "/media/default.png".to_string(),
        })
        .expect("user insert should succeed")
    }

    fn sample_movie(tmdb_id: &str, title: &str) -> Movie {
        Movie {
            tmdb_id: tmdb_id.to_string(),
            title: title.to_string(),
            poster_path: Some(format!("/{tmdb_id}.jpg")),
            overview: Some("A film.".to_string()),
            release_date: Some("1994-09-10".to_string()),
            vote_average: Some(8.4),
            genre_ids: vec![18, 80],
        }
    }

    // ------------------------------------------------------------------
    // Schema / users
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "users",
            "follows",
            "movies",
            "watchlist",
            "reviews",
            "chats",
            "messages",
            "viewer_profiles",
            "curator_profiles",
            "admin_profiles",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn create_and_fetch_user() {
        let db = test_db();
        let user = add_user(&db, "ada");
        assert!(user.id > 0);
        assert_eq!(user.role, Role::Viewer);

        let by_id = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(by_id.name, "ada");

        let by_email = db.get_user_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(db.get_user(9999).unwrap().is_none());
        assert!(db.get_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_and_name_rejected_by_schema() {
        let db = test_db();
        add_user(&db, "ada");

        let dup_email = db.create_user(&NewUser {
            name: "different".into(),
            email: "ada@example.com".into(),
            password_hash: "h".into(),
            gender: "other".into(),
            role: Role::Viewer,
            avatar_url: "a".into(),
        });
        assert!(dup_email.is_err());

        let dup_name = db.create_user(&NewUser {
            name: "ada".into(),
            email: "other@example.com".into(),
            password_hash: "h".into(),
            gender: "other".into(),
            role: Role::Viewer,
            avatar_url: "a".into(),
        });
        assert!(dup_name.is_err());

        assert!(db.email_exists("ada@example.com").unwrap());
        assert!(db.name_exists("ada").unwrap());
        assert!(!db.email_exists("free@example.com").unwrap());
    }

    #[test]
    fn search_users_matches_name_and_optionally_email() {
        let db = test_db();
        let ada = add_user(&db, "ada");
        add_user(&db, "grace");
        add_user(&db, "adam");

        // Name match, requester excluded.
        let found = db.search_users("ada", Some(ada.id), false).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "adam");

        // Email match only when include_email.
        let by_email = db.search_users("grace@example", None, true).unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].name, "grace");
        assert!(db.search_users("grace@example", None, false).unwrap().is_empty());

        // Empty search matches everyone.
        assert_eq!(db.search_users("", None, false).unwrap().len(), 3);
    }

    #[test]
    fn search_escapes_like_wildcards() {
        let db = test_db();
        add_user(&db, "percent%user");
        add_user(&db, "normal");

        let found = db.search_users("percent%", None, false).unwrap();
        assert_eq!(found.len(), 1);
        // A bare wildcard must not match everything.
        assert_eq!(db.search_users("%", None, false).unwrap().len(), 1);
    }

    #[test]
    fn update_profile_and_password() {
        let db = test_db();
        let user = add_user(&db, "ada");

        db.update_profile(user.id, Some("ada2"), None).unwrap();
        db.update_profile(user.id, None, Some("/media/new.png")).unwrap();
        let updated = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(updated.name, "ada2");
        assert_eq!(updated.avatar_url, "/media/new.png");

        db.update_password(user.id, "newhash").unwrap();
        assert_eq!(db.get_user(user.id).unwrap().unwrap().password_hash, "newhash");
    }

    #[test]
    fn update_role_and_delete_user() {
        let db = test_db();
        let user = add_user(&db, "ada");

        let updated = db.update_role(user.id, Role::Admin).unwrap().unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert!(db.update_role(9999, Role::Admin).unwrap().is_none());

        assert!(db.delete_user(user.id).unwrap());
        assert!(!db.delete_user(user.id).unwrap());
        assert!(db.get_user(user.id).unwrap().is_none());
    }

    #[test]
    fn delete_user_cascades() {
        let db = test_db();
        let a = add_user(&db, "a");
        let b = add_user(&db, "b");
        db.follow(a.id, b.id).unwrap();
        db.upsert_movie(&sample_movie("603", "The Matrix")).unwrap();
        db.watchlist_add(a.id, "603").unwrap();
        db.insert_review(a.id, "603", "The Matrix", 5, "Whoa.", None).unwrap();
        let chat = db.get_or_create_chat(a.id, b.id).unwrap();
        db.insert_message(chat, a.id, "hi").unwrap();

        db.delete_user(a.id).unwrap();

        assert!(db.follower_ids(b.id).unwrap().is_empty());
        assert!(db.reviews_for_movie("603").unwrap().is_empty());
        assert!(db.chat_participants(chat).unwrap().is_none());
    }

    // ------------------------------------------------------------------
    // Follows
    // ------------------------------------------------------------------

    #[test]
    fn follow_unfollow_round_trip() {
        let db = test_db();
        let a = add_user(&db, "a");
        let b = add_user(&db, "b");

        assert!(!db.is_following(a.id, b.id).unwrap());
        db.follow(a.id, b.id).unwrap();
        assert!(db.is_following(a.id, b.id).unwrap());
        // Follow is directional.
        assert!(!db.is_following(b.id, a.id).unwrap());

        assert_eq!(db.follower_ids(b.id).unwrap(), vec![a.id]);
        assert_eq!(db.following_ids(a.id).unwrap(), vec![b.id]);

        // Re-follow is a no-op, not an error.
        db.follow(a.id, b.id).unwrap();
        assert_eq!(db.follower_ids(b.id).unwrap().len(), 1);

        db.unfollow(a.id, b.id).unwrap();
        assert!(!db.is_following(a.id, b.id).unwrap());
    }

    #[test]
    fn follower_lists_carry_counts() {
        let db = test_db();
        let a = add_user(&db, "a");
        let b = add_user(&db, "b");
        let c = add_user(&db, "c");
        db.follow(a.id, c.id).unwrap();
        db.follow(b.id, c.id).unwrap();
        db.follow(c.id, a.id).unwrap();

        let followers = db.followers_of(c.id).unwrap();
        assert_eq!(followers.len(), 2);
        let followings = db.followings_of(c.id).unwrap();
        assert_eq!(followings.len(), 1);
        assert_eq!(followings[0].id, a.id);
        // a has one follower (c) and follows one user (c).
        assert_eq!(followings[0].followers_count, 1);
        assert_eq!(followings[0].followings_count, 1);

        let public = db.public_user(c.id).unwrap().unwrap();
        assert_eq!(public.followers_count, 2);
        assert_eq!(public.followings_count, 1);
    }

    // ------------------------------------------------------------------
    // Movies and watchlists
    // ------------------------------------------------------------------

    #[test]
    fn upsert_movie_inserts_then_refreshes() {
        let db = test_db();
        db.upsert_movie(&sample_movie("680", "Pulp Fiction")).unwrap();

        let mut updated = sample_movie("680", "Pulp Fiction (1994)");
        updated.vote_average = Some(8.9);
        db.upsert_movie(&updated).unwrap();

        let stored = db.get_movie("680").unwrap().unwrap();
        assert_eq!(stored.title, "Pulp Fiction (1994)");
        assert_eq!(stored.vote_average, Some(8.9));
        assert_eq!(stored.genre_ids, vec![18, 80]);

        assert!(db.get_movie("0").unwrap().is_none());
    }

    #[test]
    fn watchlist_add_remove_and_duplicates() {
        let db = test_db();
        let user = add_user(&db, "ada");
        db.upsert_movie(&sample_movie("680", "Pulp Fiction")).unwrap();
        db.upsert_movie(&sample_movie("603", "The Matrix")).unwrap();

        assert!(db.watchlist_add(user.id, "680").unwrap());
        assert!(!db.watchlist_add(user.id, "680").unwrap()); // duplicate
        assert!(db.watchlist_add(user.id, "603").unwrap());

        let list = db.watchlist_of(user.id).unwrap();
        assert_eq!(list.len(), 2);

        assert!(db.watchlist_remove(user.id, "680").unwrap());
        assert!(!db.watchlist_remove(user.id, "680").unwrap());
        assert_eq!(db.watchlist_of(user.id).unwrap().len(), 1);
    }

    // ------------------------------------------------------------------
    // Reviews
    // ------------------------------------------------------------------

    #[test]
    fn insert_and_list_reviews_newest_first() {
        let db = test_db();
        let a = add_user(&db, "a");
        let b = add_user(&db, "b");

        let r1 = db
            .insert_review(a.id, "680", "Pulp Fiction", 5, "Great.", Some("/p.jpg"))
            .unwrap();
        let r2 = db
            .insert_review(b.id, "680", "Pulp Fiction", 3, "Fine.", None)
            .unwrap();
        db.insert_review(a.id, "603", "The Matrix", 4, "Neat.", None)
            .unwrap();

        assert_eq!(r1.user.name, "a");
        assert_eq!(r1.rating, 5);
        assert_eq!(r1.movie_poster.as_deref(), Some("/p.jpg"));

        let for_movie = db.reviews_for_movie("680").unwrap();
        assert_eq!(for_movie.len(), 2);
        // Same created_at second is possible; the id tiebreak puts r2 first.
        assert_eq!(for_movie[0].id, r2.id);

        let by_a = db.reviews_by_user(a.id).unwrap();
        assert_eq!(by_a.len(), 2);
        assert!(by_a.iter().all(|r| r.user.id == a.id));
    }

    #[test]
    fn rating_bounds_enforced_by_check() {
        let db = test_db();
        let a = add_user(&db, "a");
        assert!(db.insert_review(a.id, "1", "M", 0, "x", None).is_err());
        assert!(db.insert_review(a.id, "1", "M", 6, "x", None).is_err());
        assert!(db.insert_review(a.id, "1", "M", 1, "x", None).is_ok());
        assert!(db.insert_review(a.id, "1", "M", 5, "x", None).is_ok());
    }

    #[test]
    fn update_and_delete_review() {
        let db = test_db();
        let a = add_user(&db, "a");
        let review = db.insert_review(a.id, "680", "PF", 3, "ok", None).unwrap();

        db.update_review(review.id, Some(5), None).unwrap();
        db.update_review(review.id, None, Some("actually great")).unwrap();
        let updated = db.get_review(review.id).unwrap().unwrap();
        assert_eq!(updated.rating, 5);
        assert_eq!(updated.body, "actually great");

        assert!(db.delete_review(review.id).unwrap());
        assert!(!db.delete_review(review.id).unwrap());
        assert!(db.get_review(review.id).unwrap().is_none());
    }

    // ------------------------------------------------------------------
    // Chats and messages
    // ------------------------------------------------------------------

    #[test]
    fn chat_pair_is_normalized() {
        let db = test_db();
        let a = add_user(&db, "a");
        let b = add_user(&db, "b");

        let chat1 = db.get_or_create_chat(a.id, b.id).unwrap();
        let chat2 = db.get_or_create_chat(b.id, a.id).unwrap();
        assert_eq!(chat1, chat2);

        let (lo, hi) = db.chat_participants(chat1).unwrap().unwrap();
        assert!(lo < hi);
        assert!(db.chat_participants(9999).unwrap().is_none());
    }

    #[test]
    fn messages_update_chat_latest_and_order() {
        let db = test_db();
        let a = add_user(&db, "a");
        let b = add_user(&db, "b");
        let c = add_user(&db, "c");

        let chat_ab = db.get_or_create_chat(a.id, b.id).unwrap();
        let chat_ac = db.get_or_create_chat(a.id, c.id).unwrap();

        db.insert_message(chat_ab, a.id, "hello b").unwrap();
        db.insert_message(chat_ac, c.id, "hello a").unwrap();
        db.insert_message(chat_ab, b.id, "hi a").unwrap();

        let messages = db.messages_of(chat_ab).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, "hello b");
        assert_eq!(messages[1].body, "hi a");

        let chats = db.chats_of(a.id).unwrap();
        assert_eq!(chats.len(), 2);
        // chat_ab was touched last, so it sorts first.
        assert_eq!(chats[0].id, chat_ab);
        assert_eq!(chats[0].latest_text.as_deref(), Some("hi a"));
        assert_eq!(chats[0].latest_sender_id, Some(b.id));
        assert_eq!(chats[0].other.id, b.id);
        assert_eq!(chats[1].other.id, c.id);

        // b only sees the one chat, with a on the other side.
        let b_chats = db.chats_of(b.id).unwrap();
        assert_eq!(b_chats.len(), 1);
        assert_eq!(b_chats[0].other.id, a.id);
    }

    // ------------------------------------------------------------------
    // Role profiles
    // ------------------------------------------------------------------

    #[test]
    fn viewer_profile_create_get_and_watchlist_append() {
        let db = test_db();
        let user = add_user(&db, "ada");

        assert!(db.get_viewer_profile(user.id).unwrap().is_none());
        assert!(db.create_viewer_profile(user.id).unwrap());
        assert!(!db.create_viewer_profile(user.id).unwrap()); // one per role

        let profile = db.get_viewer_profile(user.id).unwrap().unwrap();
        assert!(profile.watchlist.is_empty());
        assert_eq!(profile.reviews_count, 0);

        let entry = WatchlistEntry {
            movie_id: "680".into(),
            movie_title: "Pulp Fiction".into(),
            added_at: Utc::now(),
        };
        let updated = db.viewer_watchlist_add(user.id, &entry).unwrap().unwrap();
        assert_eq!(updated.watchlist.len(), 1);
        assert_eq!(updated.watchlist[0].movie_id, "680");

        // Survives a round trip through the JSON column.
        let reloaded = db.get_viewer_profile(user.id).unwrap().unwrap();
        assert_eq!(reloaded.watchlist, updated.watchlist);

        // No profile: append reports None.
        let other = add_user(&db, "other");
        assert!(db.viewer_watchlist_add(other.id, &entry).unwrap().is_none());
    }

    #[test]
    fn curator_profile_expertise_replaced() {
        let db = test_db();
        let user = add_user(&db, "curator");
        assert!(db.create_curator_profile(user.id).unwrap());

        let expertise = vec!["noir".to_string(), "giallo".to_string()];
        let updated = db.set_curator_expertise(user.id, &expertise).unwrap().unwrap();
        assert_eq!(updated.expertise, expertise);

        let replaced = db
            .set_curator_expertise(user.id, &["westerns".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(replaced.expertise, vec!["westerns".to_string()]);

        assert!(db.set_curator_expertise(9999, &[]).unwrap().is_none());
    }

    #[test]
    fn admin_profile_defaults_and_activity_log() {
        let db = test_db();
        let user = add_user(&db, "admin");
        assert!(db.create_admin_profile(user.id).unwrap());
        assert!(!db.create_admin_profile(user.id).unwrap());

        let profile = db.get_admin_profile(user.id).unwrap().unwrap();
        assert_eq!(
            profile.permissions,
            vec!["view_reports".to_string(), "moderate_content".to_string()]
        );
        assert_eq!(profile.moderation_level, "basic");
        assert!(profile.last_login.is_some());
        assert!(profile.last_moderation.is_none());
        assert!(profile.activity_log.is_empty());

        let entry = ActivityEntry {
            action: "suspend".into(),
            target_id: "42".into(),
            timestamp: Utc::now(),
        };
        let updated = db.admin_log_activity(user.id, &entry).unwrap().unwrap();
        assert_eq!(updated.activity_log.len(), 1);
        assert_eq!(updated.activity_log[0].action, "suspend");
        assert_eq!(updated.last_moderation, Some(entry.timestamp));

        assert!(db.admin_log_activity(9999, &entry).unwrap().is_none());
    }

    #[test]
    fn concurrent_watchlist_appends_keep_every_entry() {
        let db = std::sync::Arc::new(test_db());
        let user = add_user(&db, "ada");
        let uid = user.id;
        assert!(db.create_viewer_profile(uid).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = std::sync::Arc::clone(&db);
                std::thread::spawn(move || {
                    let entry = WatchlistEntry {
                        movie_id: format!("movie-{i}"),
                        movie_title: format!("Movie {i}"),
                        added_at: Utc::now(),
                    };
                    db.viewer_watchlist_add(uid, &entry).unwrap().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every append survives; none is clobbered by a racing one.
        let profile = db.get_viewer_profile(uid).unwrap().unwrap();
        assert_eq!(profile.watchlist.len(), 8);
    }

    #[test]
    fn concurrent_activity_appends_keep_every_entry() {
        let db = std::sync::Arc::new(test_db());
        let user = add_user(&db, "admin");
        let uid = user.id;
        assert!(db.create_admin_profile(uid).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = std::sync::Arc::clone(&db);
                std::thread::spawn(move || {
                    let entry = ActivityEntry {
                        action: format!("action-{i}"),
                        target_id: i.to_string(),
                        timestamp: Utc::now(),
                    };
                    db.admin_log_activity(uid, &entry).unwrap().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let profile = db.get_admin_profile(uid).unwrap().unwrap();
        assert_eq!(profile.activity_log.len(), 8);
        assert!(profile.last_moderation.is_some());
    }
}
