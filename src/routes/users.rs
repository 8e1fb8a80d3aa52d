// User profile, search, follow, and admin management handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{hash_password, verify_password, AuthUser};
use crate::error::ApiError;
use crate::models::{Role, User, UserView};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(me).put(update_me))
        .route("/me/password", put(change_password))
        .route("/all", get(list_users))
        .route("/search/public", get(public_search))
        .route("/{id}", get(get_user).delete(delete_user))
        .route("/{id}/follow", post(toggle_follow))
        .route("/{id}/followdata", get(follow_data))
        .route("/{id}/role", put(set_role))
}

/// Build the client view of `user`, with follower/following id lists.
fn view(state: &AppState, user: &User, private: bool) -> Result<UserView, ApiError> {
    let followers = state.db.follower_ids(user.id).map_err(ApiError::Internal)?;
    let followings = state.db.following_ids(user.id).map_err(ApiError::Internal)?;
    Ok(if private {
        UserView::private(user, followers, followings)
    } else {
        UserView::public(user, followers, followings)
    })
}

async fn me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(view(&state, &user, true)?))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: String,
}

/// All other users, filtered by a name/email substring. Used for the chat
/// sidebar, so the requester is excluded.
async fn list_users(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .search_users(query.search.trim(), Some(user.id), true)
        .map_err(ApiError::Internal)?;
    let views = users
        .iter()
        .map(|u| view(&state, u, false))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

/// Unauthenticated name search exposing only public fields.
async fn public_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .search_public_users(query.search.trim())
        .map_err(ApiError::Internal)?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    AuthUser(requester): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user(id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(Json(view(&state, &user, requester.id == id)?))
}

#[derive(Debug, Deserialize)]
struct UpdateProfileRequest {
    name: Option<String>,
    avatar_url: Option<String>,
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.as_deref().map(str::trim);
    if let Some(name) = name {
        if name.is_empty() {
            return Err(ApiError::BadRequest("name cannot be empty".into()));
        }
        if name != user.name && state.db.name_exists(name).map_err(ApiError::Internal)? {
            return Err(ApiError::BadRequest("username already exists".into()));
        }
    }

    state
        .db
        .update_profile(user.id, name, req.avatar_url.as_deref())
        .map_err(ApiError::Internal)?;
    let updated = state
        .db
        .get_user(user.id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(Json(view(&state, &updated, true)?))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !verify_password(&req.current_password, &user.password_hash)? {
        return Err(ApiError::BadRequest("current password is incorrect".into()));
    }
    if req.new_password.len() < 6 {
        return Err(ApiError::BadRequest(
            "password must be at least 6 characters".into(),
        ));
    }
    let hash = hash_password(&req.new_password, state.config.auth.bcrypt_cost)?;
    state
        .db
        .update_password(user.id, &hash)
        .map_err(ApiError::Internal)?;
    Ok(Json(json!({ "message": "password updated" })))
}

/// Follow toggle: following when not, unfollowing when already following.
async fn toggle_follow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if id == user.id {
        return Err(ApiError::BadRequest("you cannot follow yourself".into()));
    }
    if state.db.get_user(id).map_err(ApiError::Internal)?.is_none() {
        return Err(ApiError::NotFound("user not found".into()));
    }

    let currently = state
        .db
        .is_following(user.id, id)
        .map_err(ApiError::Internal)?;
    if currently {
        state.db.unfollow(user.id, id).map_err(ApiError::Internal)?;
    } else {
        state.db.follow(user.id, id).map_err(ApiError::Internal)?;
    }
    info!(follower = user.id, following = id, now_following = !currently, "follow toggled");
    Ok(Json(json!({
        "message": if currently { "user unfollowed" } else { "user followed" },
        "following": !currently,
    })))
}

async fn follow_data(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.get_user(id).map_err(ApiError::Internal)?.is_none() {
        return Err(ApiError::NotFound("user not found".into()));
    }
    let followers = state.db.followers_of(id).map_err(ApiError::Internal)?;
    let followings = state.db.followings_of(id).map_err(ApiError::Internal)?;
    Ok(Json(json!({
        "followers": followers,
        "followings": followings,
    })))
}

#[derive(Debug, Deserialize)]
struct SetRoleRequest {
    #[serde(default)]
    role: String,
}

async fn set_role(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<SetRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if admin.role != Role::Admin {
        return Err(ApiError::Forbidden("admin access required".into()));
    }
    let role = Role::parse(&req.role)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid role: {}", req.role)))?;
    let updated = state
        .db
        .update_role(id, role)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    info!(admin = admin.id, user = id, role = role.as_str(), "role updated");
    Ok(Json(json!({
        "message": "role updated",
        "user": view(&state, &updated, false)?,
    })))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if admin.role != Role::Admin {
        return Err(ApiError::Forbidden("admin access required".into()));
    }
    if id == admin.id {
        return Err(ApiError::BadRequest("you cannot delete your own account".into()));
    }
    if !state.db.delete_user(id).map_err(ApiError::Internal)? {
        return Err(ApiError::NotFound("user not found".into()));
    }
    info!(admin = admin.id, user = id, "user deleted");
    Ok(Json(json!({ "message": "user deleted" })))
}
