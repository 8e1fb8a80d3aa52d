// Movie search/details (proxied to TMDB), reviews, and watchlist handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::Movie;
use crate::state::AppState;
use crate::tmdb;

// Search, details and review listings are public; review and watchlist
// mutations require a logged-in user.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", get(search))
        .route("/details/{id}", get(details))
        .route("/reviews/{movie_id}", get(movie_reviews))
        .route("/user-reviews/{user_id}", get(user_reviews))
        .route("/review", post(create_review))
        .route("/review/{id}", put(update_review).delete(delete_review))
        .route("/watchlist/add", post(watchlist_add))
        .route("/watchlist/remove", post(watchlist_remove))
        .route("/watchlist/my", get(my_watchlist))
}

#[derive(Debug, Deserialize)]
struct MovieSearchQuery {
    #[serde(default)]
    query: String,
}

/// Proxy a title search to TMDB and cache every result locally. The TMDB
/// response shape is passed through to the client.
async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MovieSearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query is required".into()));
    }

    let response = state.tmdb.search(query).await?;
    for result in &response.results {
        // Cache refresh failures should not fail the search itself.
        if let Err(e) = state.db.upsert_movie(&result.to_movie()) {
            warn!("failed to cache movie {}: {e:#}", result.id);
        }
    }
    Ok(Json(response))
}

/// Proxy a details fetch (with credits and videos) to TMDB, refreshing the
/// local cache from the response.
async fn details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.tmdb.details(&id).await?;
    if let Some(movie) = tmdb::movie_from_details(&response) {
        if let Err(e) = state.db.upsert_movie(&movie) {
            warn!("failed to cache movie {}: {e:#}", movie.tmdb_id);
        }
    }
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

async fn movie_reviews(
    State(state): State<Arc<AppState>>,
    Path(movie_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reviews = state
        .db
        .reviews_for_movie(&movie_id)
        .map_err(ApiError::Internal)?;
    Ok(Json(reviews))
}

async fn user_reviews(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .db
        .get_user(user_id)
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound("user not found".into()));
    }
    let reviews = state
        .db
        .reviews_by_user(user_id)
        .map_err(ApiError::Internal)?;
    Ok(Json(reviews))
}

#[derive(Debug, Deserialize)]
struct CreateReviewRequest {
    #[serde(default)]
    movie_id: String,
    #[serde(default)]
    movie_title: String,
    rating: u8,
    #[serde(default)]
    body: String,
    movie_poster: Option<String>,
}

async fn create_review(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.movie_id.trim().is_empty()
        || req.movie_title.trim().is_empty()
        || req.body.trim().is_empty()
    {
        return Err(ApiError::BadRequest(
            "movie_id, movie_title and body are required".into(),
        ));
    }
    check_rating(req.rating)?;

    let review = state
        .db
        .insert_review(
            user.id,
            req.movie_id.trim(),
            req.movie_title.trim(),
            req.rating,
            req.body.trim(),
            req.movie_poster.as_deref(),
        )
        .map_err(ApiError::Internal)?;
    info!(user_id = user.id, review_id = review.id, "review created");
    Ok((StatusCode::CREATED, Json(review)))
}

#[derive(Debug, Deserialize)]
struct UpdateReviewRequest {
    rating: Option<u8>,
    body: Option<String>,
}

async fn update_review(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let review = state
        .db
        .get_review(id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("review not found".into()))?;
    if review.user.id != user.id {
        return Err(ApiError::Forbidden("you can only edit your own reviews".into()));
    }
    if let Some(rating) = req.rating {
        check_rating(rating)?;
    }
    let body = req.body.as_deref().map(str::trim);
    if body.is_some_and(str::is_empty) {
        return Err(ApiError::BadRequest("body cannot be empty".into()));
    }

    state
        .db
        .update_review(id, req.rating, body)
        .map_err(ApiError::Internal)?;
    let updated = state
        .db
        .get_review(id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("review not found".into()))?;
    Ok(Json(updated))
}

async fn delete_review(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let review = state
        .db
        .get_review(id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("review not found".into()))?;
    if review.user.id != user.id {
        return Err(ApiError::Forbidden(
            "you can only delete your own reviews".into(),
        ));
    }
    state.db.delete_review(id).map_err(ApiError::Internal)?;
    info!(user_id = user.id, review_id = id, "review deleted");
    Ok(Json(json!({ "message": "review deleted" })))
}

fn check_rating(rating: u8) -> Result<(), ApiError> {
    if !(1..=5).contains(&rating) {
        return Err(ApiError::BadRequest("rating must be between 1 and 5".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Watchlist
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WatchlistAddRequest {
    #[serde(default)]
    movie_id: String,
    #[serde(default)]
    movie_title: String,
    movie_poster: Option<String>,
}

async fn watchlist_add(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<WatchlistAddRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let movie_id = req.movie_id.trim();
    if movie_id.is_empty() {
        return Err(ApiError::BadRequest("movie_id is required".into()));
    }

    // Watchlist rows reference the movie cache; seed it from the request
    // when the movie has not been searched before.
    if state
        .db
        .get_movie(movie_id)
        .map_err(ApiError::Internal)?
        .is_none()
    {
        if req.movie_title.trim().is_empty() {
            return Err(ApiError::BadRequest("movie_title is required".into()));
        }
        state
            .db
            .upsert_movie(&Movie {
                tmdb_id: movie_id.to_string(),
                title: req.movie_title.trim().to_string(),
                poster_path: req.movie_poster.clone(),
                overview: None,
                release_date: None,
                vote_average: None,
                genre_ids: vec![],
            })
            .map_err(ApiError::Internal)?;
    }

    if !state
        .db
        .watchlist_add(user.id, movie_id)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::BadRequest("movie already in watchlist".into()));
    }
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "movie added to watchlist" })),
    ))
}

#[derive(Debug, Deserialize)]
struct WatchlistRemoveRequest {
    #[serde(default)]
    movie_id: String,
}

async fn watchlist_remove(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<WatchlistRemoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state
        .db
        .watchlist_remove(user.id, req.movie_id.trim())
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::BadRequest("movie not in watchlist".into()));
    }
    Ok(Json(json!({ "message": "movie removed from watchlist" })))
}

async fn my_watchlist(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let movies = state.db.watchlist_of(user.id).map_err(ApiError::Internal)?;
    Ok(Json(movies))
}
