// Register, login, and logout handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{auth_cookie, clear_cookie, generate_token, hash_password, verify_password};
use crate::db::NewUser;
use crate::error::ApiError;
use crate::models::{Role, UserView};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

const DEFAULT_AVATAR: &str = "/media/default-avatar.png";

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    gender: String,
    role: Option<String>,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty()
        || req.email.trim().is_empty()
        || req.password.is_empty()
        || req.gender.trim().is_empty()
    {
        return Err(ApiError::BadRequest("all fields are required".into()));
    }
    if req.password.len() < 6 {
        return Err(ApiError::BadRequest(
            "password must be at least 6 characters".into(),
        ));
    }
    let role = match req.role.as_deref() {
        Some(role) => Role::parse(role)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid role: {role}")))?,
        None => Role::default(),
    };

    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();
    if state.db.email_exists(&email).map_err(ApiError::Internal)? {
        return Err(ApiError::BadRequest("email already exists".into()));
    }
    if state.db.name_exists(&name).map_err(ApiError::Internal)? {
        return Err(ApiError::BadRequest("username already exists".into()));
    }

    let password_hash = hash_password(&req.password, state.config.auth.bcrypt_cost)?;
    let user = state
        .db
        .create_user(&NewUser {
            name,
            email,
            password_hash,
            gender: req.gender.trim().to_string(),
            role,
            avatar_url: DEFAULT_AVATAR.to_string(),
        })
        .map_err(ApiError::Internal)?;
    info!(user_id = user.id, "registered new user");

    let ttl = state.config.auth.token_ttl_days;
    let token = generate_token(user.id, state.jwt_secret()?, ttl)?;
    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, auth_cookie(&token, ttl))],
        Json(json!({
            "message": "user created",
            "user": UserView::private(&user, vec![], vec![]),
            "token": token,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    // Unknown email and wrong password produce the same error.
    let user = state
        .db
        .get_user_by_email(&email)
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::InvalidCredentials)?;
    if !verify_password(&req.password, &user.password_hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    let followers = state.db.follower_ids(user.id).map_err(ApiError::Internal)?;
    let followings = state.db.following_ids(user.id).map_err(ApiError::Internal)?;
    let ttl = state.config.auth.token_ttl_days;
    let token = generate_token(user.id, state.jwt_secret()?, ttl)?;
    info!(user_id = user.id, "user logged in");
    Ok((
        [(SET_COOKIE, auth_cookie(&token, ttl))],
        Json(json!({
            "message": "logged in",
            "user": UserView::private(&user, followers, followings),
            "token": token,
        })),
    ))
}

async fn logout() -> impl IntoResponse {
    (
        [(SET_COOKIE, clear_cookie())],
        Json(json!({ "message": "logged out" })),
    )
}
