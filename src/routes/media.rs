// Media upload and serving. Uploads (avatars) land on local disk under the
// configured media directory and are served back under /media.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/media",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/media/{name}", get(serve))
}

// Replaces axum's 2 MB default body limit; larger uploads are rejected with
// 413 before the handler runs.
const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

async fn upload(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let ext = extension_for(content_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported media type: {content_type}")))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }

    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let name = format!("{}-{}.{}", user.id, stamp, ext);
    let path = PathBuf::from(&state.config.media_dir).join(&name);
    tokio::fs::write(&path, &body)
        .await
        .with_context(|| format!("failed to write media file {}", path.display()))
        .map_err(ApiError::Internal)?;
    info!(user_id = user.id, name = %name, bytes = body.len(), "media uploaded");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "url": format!("/media/{name}") })),
    ))
}

async fn serve(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_media_name(&name) {
        return Err(ApiError::BadRequest("invalid media name".into()));
    }
    let path = PathBuf::from(&state.config.media_dir).join(&name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("media not found".into()))?;
    Ok(([(CONTENT_TYPE, content_type_for(&name))], bytes))
}

/// Map an upload content type to a file extension. Only image types are
/// accepted.
fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// A media name must be a bare file name; anything that could traverse out
/// of the media directory is rejected.
fn valid_media_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.starts_with('.')
}
