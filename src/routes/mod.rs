// HTTP API surface. Each submodule owns one route group; `router` wires
// them together with CORS and the shared state.

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use axum::http::Method;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub mod auth;
pub mod media;
pub mod messages;
pub mod movies;
pub mod profiles;
pub mod users;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, COOKIE]);

    Router::new()
        .nest("/api/auth", auth::router())
        .nest("/api/user", users::router())
        .nest("/api/movies", movies::router())
        .nest("/api/profile", profiles::router())
        .nest("/api/messages", messages::router())
        .merge(media::router())
        .layer(cors)
        .with_state(state)
}
