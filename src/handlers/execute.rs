use axum::{extract::Extension, http::StatusCode, Json};
use tracing::{error, info};

use crate::clients::judge_client::{get_judge_client, ExecuteError};
use crate::models::{ErrorResponse, ExecuteRequest, ExecuteResponse};

/// Run a snippet against the external judge on behalf of the caller.
pub async fn execute(
    Extension(user_id): Extension<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Some(client) = get_judge_client() else {
        error!("Execution requested but no judge client is configured");
        let status = StatusCode::SERVICE_UNAVAILABLE;
        return Err((
            status,
            Json(ErrorResponse::new(status, "Code execution is not configured")),
        ));
    };

    info!(user = %user_id, language = request.language_id, "executing snippet");
    match client
        .execute(&request.source_code, request.language_id, &request.stdin)
        .await
    {
        Ok(result) => Ok(Json(result)),
        Err(ExecuteError::Timeout) => {
            let status = StatusCode::GATEWAY_TIMEOUT;
            Err((
                status,
                Json(ErrorResponse::new(status, "Execution timed out awaiting a result")),
            ))
        }
        Err(ExecuteError::Upstream(e)) => {
            error!(%e, "execution service failed");
            let status = StatusCode::BAD_GATEWAY;
            Err((
                status,
                Json(ErrorResponse::new(status, format!("Error executing code: {}", e))),
            ))
        }
    }
}
