// TMDB API client using reqwest.
//
// The server never exposes the API key to browsers; handlers call this client
// and cache the interesting fields in SQLite via `Database::upsert_movie`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::error::ApiError;
use crate::models::Movie;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TmdbError {
    /// TMDB answered with a non-success status. The upstream status code and
    /// its `status_message` are preserved for the client response.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("request to TMDB failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to decode TMDB response: {0}")]
    Decode(#[from] serde_json::Error),

    /// No API key configured; movie endpoints are unavailable.
    #[error("TMDB API key not configured")]
    Disabled,
}

impl From<TmdbError> for ApiError {
    fn from(err: TmdbError) -> Self {
        match err {
            TmdbError::Status { status, message } => ApiError::Upstream { status, message },
            TmdbError::Disabled => ApiError::Upstream {
                status: 500,
                message: err.to_string(),
            },
            TmdbError::Network(_) | TmdbError::Decode(_) => ApiError::Upstream {
                status: 502,
                message: err.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// One movie as returned by TMDB's search endpoint. Serialized back out
/// unchanged by the search handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbMovie {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
}

impl TmdbMovie {
    /// Convert to the locally cached movie record.
    pub fn to_movie(&self) -> Movie {
        Movie {
            tmdb_id: self.id.to_string(),
            title: self.title.clone(),
            poster_path: self.poster_path.clone(),
            overview: self.overview.clone(),
            release_date: self.release_date.clone(),
            vote_average: self.vote_average,
            genre_ids: self.genre_ids.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<TmdbMovie>,
    #[serde(default)]
    pub total_results: i64,
}

// ---------------------------------------------------------------------------
// TmdbClient
// ---------------------------------------------------------------------------

/// Low-level TMDB HTTP client.
pub struct TmdbClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    /// Create a new client. `base_url` is the API root without a trailing
    /// slash, e.g. `https://api.themoviedb.org/3`.
    pub fn new(api_key: String, base_url: String, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Search movies by title.
    pub async fn search(&self, query: &str) -> Result<SearchResponse, TmdbError> {
        let url = format!("{}/search/movie", self.base_url);
        let body = self
            .get(&url, &[("query", query), ("include_adult", "false")])
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch full details for one movie, including credits and videos. The
    /// response is passed through to the client as-is.
    pub async fn details(&self, tmdb_id: &str) -> Result<Value, TmdbError> {
        let url = format!("{}/movie/{}", self.base_url, tmdb_id);
        let body = self
            .get(&url, &[("append_to_response", "credits,videos")])
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String, TmdbError> {
        let response = self
            .http
            .get(url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TmdbError::Status {
                status: status.as_u16(),
                message: error_message(&body, status.as_u16()),
            });
        }
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Tmdb wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that is either an active TMDB client or disabled.
pub enum Tmdb {
    /// TMDB is configured and ready.
    Active(TmdbClient),
    /// No API key configured; movie endpoints answer 500.
    Disabled,
}

impl Tmdb {
    /// Build a `Tmdb` from the application config. Returns `Active` when an
    /// API key is present in credentials, otherwise `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.tmdb_api_key {
            Some(key) if !key.is_empty() => Tmdb::Active(TmdbClient::new(
                key.clone(),
                config.tmdb.base_url.clone(),
                config.tmdb.timeout_secs,
            )),
            _ => Tmdb::Disabled,
        }
    }

    pub async fn search(&self, query: &str) -> Result<SearchResponse, TmdbError> {
        match self {
            Tmdb::Active(client) => client.search(query).await,
            Tmdb::Disabled => Err(TmdbError::Disabled),
        }
    }

    pub async fn details(&self, tmdb_id: &str) -> Result<Value, TmdbError> {
        match self {
            Tmdb::Active(client) => client.details(tmdb_id).await,
            Tmdb::Disabled => Err(TmdbError::Disabled),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Extract TMDB's `status_message` from an error body, falling back to a
/// generic message carrying the status code.
pub(crate) fn error_message(body: &str, status: u16) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("status_message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("TMDB returned status {status}"))
}

/// Extract the cacheable movie fields from a details response.
///
/// Details responses carry full `genres` objects rather than the search
/// endpoint's bare `genre_ids`. Returns `None` when the response is missing
/// an id or title.
pub(crate) fn movie_from_details(v: &Value) -> Option<Movie> {
    let id = v.get("id")?.as_i64()?;
    let title = v.get("title")?.as_str()?.to_string();
    let genre_ids = v
        .get("genres")
        .and_then(Value::as_array)
        .map(|genres| {
            genres
                .iter()
                .filter_map(|g| g.get("id")?.as_i64())
                .collect()
        })
        .unwrap_or_default();
    Some(Movie {
        tmdb_id: id.to_string(),
        title,
        poster_path: v
            .get("poster_path")
            .and_then(Value::as_str)
            .map(str::to_string),
        overview: v.get("overview").and_then(Value::as_str).map(str::to_string),
        release_date: v
            .get("release_date")
            .and_then(Value::as_str)
            .map(str::to_string),
        vote_average: v.get("vote_average").and_then(Value::as_f64),
        genre_ids,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
