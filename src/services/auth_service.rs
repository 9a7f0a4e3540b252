//! Credential checks shared by the WebSocket gateway and the HTTP API.
//!
//! The credential is a JWT issued by the account service, carried in the
//! `token` cookie (a `Bearer` header is accepted as a fallback). Both the
//! relay handshake and the HTTP middleware consume the same functions, so
//! the policy lives in one place.

use std::fmt;

use axum::http;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use tracing::warn;

pub const TOKEN_COOKIE: &str = "token";

/// The authenticated identity behind a connection or request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Unauthorized: Missing token"),
            AuthError::InvalidToken => write!(f, "Unauthorized: Invalid token"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Extract the credential from a request: `token` cookie first, then a
/// `Bearer` Authorization header.
pub fn get_auth_token<B>(req: &http::Request<B>) -> Option<String> {
    if let Some(cookie_header) = req.headers().get(http::header::COOKIE) {
        if let Ok(raw) = cookie_header.to_str() {
            for cookie in cookie::Cookie::split_parse(raw).flatten() {
                if cookie.name() == TOKEN_COOKIE {
                    return Some(cookie.value().to_string());
                }
            }
        }
    }
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        if let Ok(value) = auth_header.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// Validate a JWT and return its raw claims.
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Verify a credential against the configured secret and derive the identity
/// from its `userId` (or `sub`) claim.
pub fn authenticate_token(token: &str) -> Result<Identity, AuthError> {
    let config = crate::config::get_config();
    let Some(secret) = &config.jwt_secret else {
        warn!("JWT secret not configured; refusing credential");
        return Err(AuthError::InvalidToken);
    };
    let token_data = validate_jwt(token, secret).map_err(|e| {
        warn!(%e, "JWT validation failed");
        AuthError::InvalidToken
    })?;
    let user_id = token_data
        .claims
        .get("userId")
        .or_else(|| token_data.claims.get("sub"))
        .and_then(|v| v.as_str())
        .ok_or(AuthError::InvalidToken)?;
    Ok(Identity {
        user_id: user_id.to_string(),
    })
}
