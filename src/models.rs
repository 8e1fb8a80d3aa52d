// Domain records shared between the database layer, the HTTP handlers, and
// the WebSocket gateway. All entities are flat records; array-valued fields
// are JSON columns in SQLite and plain `Vec`s here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Application-level user role. Gates a handful of endpoints (role changes,
/// user deletion) and selects which per-role profile a user may create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Curator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Curator => "curator",
            Role::Admin => "admin",
        }
    }

    /// Parse a role name. Returns `None` for anything outside the three
    /// valid roles; callers turn that into a 400.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "viewer" => Some(Role::Viewer),
            "curator" => Some(Role::Curator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Viewer
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Internal user record, including the password hash. Never serialized to
/// clients directly; see [`UserView`] and [`PublicUser`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub gender: String,
    pub role: Role,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
}

/// Full client-facing view of a user (own profile, admin listings). Includes
/// follower/following id lists, never the password hash.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserView {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    pub role: Role,
    pub avatar_url: String,
    pub followers: Vec<i64>,
    pub followings: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl UserView {
    /// Build the owner-facing view (email and gender visible).
    pub fn private(user: &User, followers: Vec<i64>, followings: Vec<i64>) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: Some(user.email.clone()),
            gender: Some(user.gender.clone()),
            role: user.role,
            avatar_url: user.avatar_url.clone(),
            followers,
            followings,
            created_at: user.created_at,
        }
    }

    /// Build the view other users see: email and gender are omitted.
    pub fn public(user: &User, followers: Vec<i64>, followings: Vec<i64>) -> Self {
        Self {
            email: None,
            gender: None,
            ..Self::private(user, followers, followings)
        }
    }
}

/// Minimal public user info used in search results, follower lists, review
/// authorship, and chat participant lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub avatar_url: String,
    pub followers_count: i64,
    pub followings_count: i64,
}

// ---------------------------------------------------------------------------
// Movies and reviews
// ---------------------------------------------------------------------------

/// Locally cached movie metadata, upserted from every TMDB search or detail
/// fetch. `tmdb_id` is the natural key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movie {
    pub tmdb_id: String,
    pub title: String,
    pub poster_path: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub vote_average: Option<f64>,
    pub genre_ids: Vec<i64>,
}

/// A user's review of a movie. Rating is bounded 1..=5 (enforced at the
/// handler and by a CHECK constraint).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Review {
    pub id: i64,
    pub movie_id: String,
    pub movie_title: String,
    pub user: PublicUser,
    pub rating: u8,
    pub body: String,
    pub movie_poster: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chats and messages
// ---------------------------------------------------------------------------

/// A two-party chat as seen by one participant: the other user plus the
/// latest message for the chat list.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatSummary {
    pub id: i64,
    pub other: PublicUser,
    pub latest_text: Option<String>,
    pub latest_sender_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Role profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchlistEntry {
    pub movie_id: String,
    pub movie_title: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedEntry {
    pub movie_id: String,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ViewerProfile {
    pub user_id: i64,
    pub watchlist: Vec<WatchlistEntry>,
    pub favorite_genres: Vec<String>,
    pub reviews_count: i64,
    pub watched_movies: Vec<WatchedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CuratedList {
    pub list_name: String,
    pub description: String,
    pub movies: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub movie_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CuratorProfile {
    pub user_id: i64,
    pub curated_lists: Vec<CuratedList>,
    pub recommendations: Vec<Recommendation>,
    pub expertise: Vec<String>,
    pub followers_count: i64,
    pub lists_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuspendedUser {
    pub user_id: i64,
    pub reason: String,
    pub suspended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub action: String,
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdminProfile {
    pub user_id: i64,
    pub permissions: Vec<String>,
    pub moderation_level: String,
    pub last_login: Option<DateTime<Utc>>,
    pub last_moderation: Option<DateTime<Utc>>,
    pub reports_handled: i64,
    pub users_managed: i64,
    pub suspended_users: Vec<SuspendedUser>,
    pub activity_log: Vec<ActivityEntry>,
}
