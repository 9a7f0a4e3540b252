use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request to run a snippet against the external judge
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub source_code: String,
    pub language_id: u32,
    #[serde(default)]
    pub stdin: String,
}

/// Terminal status reported by the judge
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecutionStatus {
    pub id: i32,
    pub description: String,
}

/// Outcome of a finished (or failed) execution
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExecuteResponse {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Wall time in seconds, as reported by the judge
    pub time: Option<String>,
    /// Peak memory in kilobytes
    pub memory: Option<i64>,
    pub status: ExecutionStatus,
    /// Submission token at the judge, useful for support lookups
    pub token: Option<String>,
}
