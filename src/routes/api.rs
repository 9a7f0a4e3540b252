use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::{execute, health_check, ready_check};
use crate::routes::auth_middleware::auth_middleware;

/// Create API routes
pub fn create_api_routes() -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route_layer(middleware::from_fn(auth_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}
