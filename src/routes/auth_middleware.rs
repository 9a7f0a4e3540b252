use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::warn;

use crate::services::auth_service::{authenticate_token, get_auth_token};

/// Require a valid credential on the wrapped routes and expose the caller's
/// user id to downstream handlers. Uses the same verification as the relay
/// gateway, so the policy lives in one place.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(token) = get_auth_token(&req) else {
        warn!(path = %req.uri().path(), "request rejected: missing token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let identity = match authenticate_token(&token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(path = %req.uri().path(), %e, "request rejected");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    req.extensions_mut().insert(identity.user_id);
    Ok(next.run(req).await)
}
