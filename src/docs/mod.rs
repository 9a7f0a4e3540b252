use utoipa::OpenApi;

use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Execute a code snippet
#[utoipa::path(
    post,
    path = "/api/execute",
    request_body = ExecuteRequest,
    responses(
        (status = 200, description = "Execution finished", body = ExecuteResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 502, description = "Execution service failed", body = ErrorResponse),
        (status = 504, description = "Execution timed out", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn execute_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        execute_doc,
    ),
    components(
        schemas(HealthResponse, ErrorResponse, ExecuteRequest, ExecuteResponse, ExecutionStatus)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
