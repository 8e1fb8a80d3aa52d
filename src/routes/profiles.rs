// Role-profile handlers: one profile per role per user, with role-specific
// operations (viewer watchlist, curator expertise, admin activity log).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{ActivityEntry, Role, User, WatchlistEntry};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/viewer", post(create_viewer))
        .route("/curator", post(create_curator))
        .route("/admin", post(create_admin))
        .route("/{role}/{user_id}", axum::routing::get(get_profile))
        .route("/viewer/watchlist", post(viewer_watchlist))
        .route("/curator/expertise", put(curator_expertise))
        .route("/admin/activity", post(admin_activity))
}

/// Creating a profile requires holding the matching role.
fn require_role(user: &User, role: Role) -> Result<(), ApiError> {
    if user.role != role {
        return Err(ApiError::Forbidden(format!(
            "requires the {} role",
            role.as_str()
        )));
    }
    Ok(())
}

async fn create_viewer(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&user, Role::Viewer)?;
    if !state
        .db
        .create_viewer_profile(user.id)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::Conflict("viewer profile already exists".into()));
    }
    let profile = state
        .db
        .get_viewer_profile(user.id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("viewer profile not found".into()))?;
    info!(user_id = user.id, "viewer profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn create_curator(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&user, Role::Curator)?;
    if !state
        .db
        .create_curator_profile(user.id)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::Conflict("curator profile already exists".into()));
    }
    let profile = state
        .db
        .get_curator_profile(user.id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("curator profile not found".into()))?;
    info!(user_id = user.id, "curator profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn create_admin(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&user, Role::Admin)?;
    if !state
        .db
        .create_admin_profile(user.id)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::Conflict("admin profile already exists".into()));
    }
    let profile = state
        .db
        .get_admin_profile(user.id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("admin profile not found".into()))?;
    info!(user_id = user.id, "admin profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
    Path((role, user_id)): Path<(String, i64)>,
) -> Result<Response, ApiError> {
    let role =
        Role::parse(&role).ok_or_else(|| ApiError::BadRequest(format!("invalid role: {role}")))?;
    let response = match role {
        Role::Viewer => state
            .db
            .get_viewer_profile(user_id)
            .map_err(ApiError::Internal)?
            .map(|p| Json(p).into_response()),
        Role::Curator => state
            .db
            .get_curator_profile(user_id)
            .map_err(ApiError::Internal)?
            .map(|p| Json(p).into_response()),
        Role::Admin => state
            .db
            .get_admin_profile(user_id)
            .map_err(ApiError::Internal)?
            .map(|p| Json(p).into_response()),
    };
    response.ok_or_else(|| ApiError::NotFound(format!("{} profile not found", role.as_str())))
}

#[derive(Debug, Deserialize)]
struct ViewerWatchlistRequest {
    #[serde(default)]
    movie_id: String,
    #[serde(default)]
    movie_title: String,
}

async fn viewer_watchlist(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<ViewerWatchlistRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.movie_id.trim().is_empty() || req.movie_title.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "movie_id and movie_title are required".into(),
        ));
    }
    let entry = WatchlistEntry {
        movie_id: req.movie_id.trim().to_string(),
        movie_title: req.movie_title.trim().to_string(),
        added_at: Utc::now(),
    };
    let profile = state
        .db
        .viewer_watchlist_add(user.id, &entry)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("viewer profile not found".into()))?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
struct ExpertiseRequest {
    #[serde(default)]
    expertise: Vec<String>,
}

async fn curator_expertise(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<ExpertiseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .db
        .set_curator_expertise(user.id, &req.expertise)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("curator profile not found".into()))?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
struct ActivityRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    target_id: String,
}

async fn admin_activity(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<ActivityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.action.trim().is_empty() {
        return Err(ApiError::BadRequest("action is required".into()));
    }
    let entry = ActivityEntry {
        action: req.action.trim().to_string(),
        target_id: req.target_id.trim().to_string(),
        timestamp: Utc::now(),
    };
    let profile = state
        .db
        .admin_log_activity(user.id, &entry)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("admin profile not found".into()))?;
    Ok(Json(profile))
}
