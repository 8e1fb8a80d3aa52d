// Chat handlers. Messages are written over REST; delivery to online
// recipients happens through the WebSocket gateway.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::presence::GatewayEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(send_message))
        .route("/chats", get(my_chats))
        .route("/{chat_id}", get(chat_messages))
}

async fn my_chats(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let chats = state.db.chats_of(user.id).map_err(ApiError::Internal)?;
    Ok(Json(chats))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    recipient_id: i64,
    #[serde(default)]
    body: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body = req.body.trim();
    if body.is_empty() {
        return Err(ApiError::BadRequest("message body is required".into()));
    }
    if req.recipient_id == user.id {
        return Err(ApiError::BadRequest("you cannot message yourself".into()));
    }
    if state
        .db
        .get_user(req.recipient_id)
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound("recipient not found".into()));
    }

    let chat_id = state
        .db
        .get_or_create_chat(user.id, req.recipient_id)
        .map_err(ApiError::Internal)?;
    let message = state
        .db
        .insert_message(chat_id, user.id, body)
        .map_err(ApiError::Internal)?;
    info!(sender = user.id, recipient = req.recipient_id, chat_id, "message sent");

    // Push to every open socket of the recipient; offline recipients just
    // read the chat later.
    let delivered = state.presence.send_to_user(
        req.recipient_id,
        &GatewayEvent::NewMessage {
            message: message.clone(),
        },
    );
    debug!(recipient = req.recipient_id, delivered, "message fan-out");

    Ok((StatusCode::CREATED, Json(message)))
}

async fn chat_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (a, b) = state
        .db
        .chat_participants(chat_id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("chat not found".into()))?;
    if user.id != a && user.id != b {
        return Err(ApiError::Forbidden(
            "you are not a participant of this chat".into(),
        ));
    }
    let messages = state.db.messages_of(chat_id).map_err(ApiError::Internal)?;
    Ok(Json(messages))
}
