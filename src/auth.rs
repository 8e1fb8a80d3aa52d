// Authentication primitives: bcrypt password hashing, HS256 token issuing
// and verification, auth cookie construction, and the `AuthUser` extractor
// that protected handlers take as an argument.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::User;
use crate::state::AppState;

/// Name of the auth cookie set on register/login and cleared on logout.
pub const TOKEN_COOKIE: &str = "token";

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    bcrypt::hash(password, cost)
        .context("failed to hash password")
        .map_err(ApiError::Internal)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    bcrypt::verify(password, hash)
        .context("failed to verify password")
        .map_err(ApiError::Internal)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id.
    sub: i64,
    /// Expiry as a unix timestamp; validated by `jsonwebtoken` on decode.
    exp: i64,
}

/// Issue a signed token for `user_id`, valid for `ttl_days`.
pub fn generate_token(user_id: i64, secret: &str, ttl_days: i64) -> Result<String, ApiError> {
    let exp = (Utc::now() + Duration::days(ttl_days)).timestamp();
    let claims = Claims { sub: user_id, exp };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("failed to sign token")
    .map_err(ApiError::Internal)
}

/// Verify a token and return the user id it was issued for. Expired or
/// tampered tokens yield `Unauthorized`.
pub fn verify_token(token: &str, secret: &str) -> Result<i64, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;
    Ok(data.claims.sub)
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

/// Build the `Set-Cookie` value for a fresh token.
pub fn auth_cookie(token: &str, ttl_days: i64) -> String {
    let max_age = ttl_days * 24 * 60 * 60;
    format!("{TOKEN_COOKIE}={token}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=Lax")
}

/// Build the `Set-Cookie` value that clears the token cookie.
pub fn clear_cookie() -> String {
    format!("{TOKEN_COOKIE}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax")
}

/// Extract the bearer token from request headers: `Authorization: Bearer`
/// takes precedence, then the `token` cookie. Tab-independent clients send
/// the header; browser sessions rely on the cookie.
pub fn token_from_headers(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    let cookies = parts.headers.get(COOKIE)?.to_str().ok()?;
    cookie_value(cookies, TOKEN_COOKIE)
}

/// Find a cookie value in a `Cookie` header string.
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name && !v.is_empty()).then(|| v.to_string())
    })
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// The authenticated user, resolved from the request's token. Handlers that
/// require auth take `AuthUser` as an argument; requests without a valid
/// token are rejected with 401 before the handler runs.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(parts).ok_or(ApiError::Unauthorized)?;
        let secret = state.jwt_secret()?;
        let user_id = verify_token(&token, secret)?;
        let user = state
            .db
            .get_user(user_id)
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::Unauthorized)?;
        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    const SECRET: &str = "test-secret";

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2", 4).unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same", 4).unwrap();
        let b = hash_password("same", 4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn token_round_trip() {
        let token = generate_token(42, SECRET, 15).unwrap();
        assert_eq!(verify_token(&token, SECRET).unwrap(), 42);
    }

    #[test]
    fn token_rejected_with_wrong_secret() {
        let token = generate_token(42, SECRET, 15).unwrap();
        let err = verify_token(&token, "other-secret").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn tampered_token_rejected() {
        let mut token = generate_token(42, SECRET, 15).unwrap();
        token.push('x');
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn expired_token_rejected() {
        // Sign a token that expired an hour ago, bypassing generate_token.
        let claims = Claims {
            sub: 1,
            exp: (Utc::now() - Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn auth_cookie_format() {
        let cookie = auth_cookie("abc", 15);
        assert!(cookie.starts_with("token=abc; "));
        assert!(cookie.contains("Max-Age=1296000")); // 15 days in seconds
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
    }

    #[test]
    fn clear_cookie_zeroes_max_age() {
        let cookie = clear_cookie();
        assert!(cookie.starts_with("token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn token_from_bearer_header() {
        let parts = parts_with_headers(&[("authorization", "Bearer my-token")]);
        assert_eq!(token_from_headers(&parts).as_deref(), Some("my-token"));
    }

    #[test]
    fn token_from_cookie() {
        let parts = parts_with_headers(&[("cookie", "other=1; token=cookie-token; x=2")]);
        assert_eq!(
            token_from_headers(&parts).as_deref(),
            Some("cookie-token")
        );
    }

    #[test]
    fn bearer_header_takes_precedence_over_cookie() {
        let parts = parts_with_headers(&[
            ("authorization", "Bearer header-token"),
            ("cookie", "token=cookie-token"),
        ]);
        assert_eq!(
            token_from_headers(&parts).as_deref(),
            Some("header-token")
        );
    }

    #[test]
    fn missing_and_empty_tokens_yield_none() {
        let parts = parts_with_headers(&[]);
        assert!(token_from_headers(&parts).is_none());

        let parts = parts_with_headers(&[("cookie", "token=")]);
        assert!(token_from_headers(&parts).is_none());

        let parts = parts_with_headers(&[("authorization", "Basic dXNlcjpwdw==")]);
        assert!(token_from_headers(&parts).is_none());
    }

    #[test]
    fn cookie_value_parsing() {
        assert_eq!(cookie_value("a=1; b=2", "b").as_deref(), Some("2"));
        assert_eq!(cookie_value("a=1;b=2", "b").as_deref(), Some("2"));
        assert_eq!(cookie_value("a=1", "b"), None);
        assert_eq!(cookie_value("", "b"), None);
    }
}
