use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for health and readiness checks
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}
