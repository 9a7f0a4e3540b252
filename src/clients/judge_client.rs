//! Client for the external code-execution judge (Judge0-compatible API).
//!
//! Stateless request/poll bridge: create a submission, then poll its status
//! at a fixed interval up to a bounded attempt count. Exceeding the bound is
//! a timeout, reported distinctly from an error the judge itself produced.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::models::{ExecuteResponse, ExecutionStatus};

static JUDGE_CLIENT: OnceCell<Arc<JudgeClient>> = OnceCell::const_new();

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLL_ATTEMPTS: u32 = 10;
// Judge0 status ids: 1 = in queue, 2 = processing, >= 3 terminal.
const FIRST_TERMINAL_STATUS: i32 = 3;

#[derive(Debug)]
pub enum ExecuteError {
    /// The judge rejected the request or the transport failed.
    Upstream(String),
    /// No terminal status after the bounded poll count.
    Timeout,
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::Upstream(e) => write!(f, "execution service failed: {}", e),
            ExecuteError::Timeout => write!(f, "execution timed out awaiting a result"),
        }
    }
}

impl std::error::Error for ExecuteError {}

impl From<reqwest::Error> for ExecuteError {
    fn from(e: reqwest::Error) -> Self {
        ExecuteError::Upstream(e.to_string())
    }
}

#[derive(Debug)]
pub struct JudgeClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SubmissionRequest<'a> {
    source_code: &'a str,
    language_id: u32,
    stdin: &'a str,
    wait: bool,
}

#[derive(Debug, Deserialize)]
struct SubmissionResult {
    token: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    time: Option<String>,
    memory: Option<i64>,
    status: Option<JudgeStatus>,
}

#[derive(Debug, Deserialize)]
struct JudgeStatus {
    id: i32,
    description: String,
}

fn is_terminal(status: &JudgeStatus) -> bool {
    status.id >= FIRST_TERMINAL_STATUS
}

impl JudgeClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build reqwest client");
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder
                .header("X-RapidAPI-Key", key)
                .header("X-RapidAPI-Host", "judge0-ce.p.rapidapi.com"),
            None => builder,
        }
    }

    /// Submit a snippet and wait for a terminal status.
    pub async fn execute(
        &self,
        source_code: &str,
        language_id: u32,
        stdin: &str,
    ) -> Result<ExecuteResponse, ExecuteError> {
        let url = format!("{}/submissions?base64_encoded=false&wait=true", self.base_url);
        let body = SubmissionRequest {
            source_code,
            language_id,
            stdin,
            wait: true,
        };
        let created: SubmissionResult = self
            .request(self.client.post(&url).json(&body))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ExecuteError::Upstream(e.to_string()))?
            .json()
            .await?;

        // Synchronous mode may already carry the result.
        if let Some(status) = &created.status {
            if is_terminal(status) {
                return Ok(into_response(created));
            }
        }

        let token = created
            .token
            .clone()
            .ok_or_else(|| ExecuteError::Upstream("judge returned no submission token".into()))?;
        self.poll(&token).await
    }

    async fn poll(&self, token: &str) -> Result<ExecuteResponse, ExecuteError> {
        let url = format!(
            "{}/submissions/{}?base64_encoded=false&fields=stdout,stderr,status_id,status,time,memory,token",
            self.base_url, token
        );
        for attempt in 1..=MAX_POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
            let result: SubmissionResult = self
                .request(self.client.get(&url))
                .send()
                .await?
                .error_for_status()
                .map_err(|e| ExecuteError::Upstream(e.to_string()))?
                .json()
                .await?;
            match &result.status {
                Some(status) if is_terminal(status) => {
                    debug!(token, attempt, status = status.id, "submission finished");
                    return Ok(into_response(result));
                }
                _ => debug!(token, attempt, "submission still running"),
            }
        }
        warn!(token, attempts = MAX_POLL_ATTEMPTS, "no terminal status; giving up");
        Err(ExecuteError::Timeout)
    }
}

fn into_response(result: SubmissionResult) -> ExecuteResponse {
    let status = result
        .status
        .map(|s| ExecutionStatus {
            id: s.id,
            description: s.description,
        })
        .unwrap_or(ExecutionStatus {
            id: 0,
            description: "Unknown".to_string(),
        });
    ExecuteResponse {
        stdout: result.stdout,
        stderr: result.stderr,
        time: result.time,
        memory: result.memory,
        status,
        token: result.token,
    }
}

/// Initialize the global JudgeClient
pub fn init_judge_client(base_url: String, api_key: Option<String>) -> Result<(), &'static str> {
    let client = JudgeClient::new(base_url, api_key);
    JUDGE_CLIENT
        .set(Arc::new(client))
        .map_err(|_| "JudgeClient already initialized")
}

/// Get the global JudgeClient instance
pub fn get_judge_client() -> Option<Arc<JudgeClient>> {
    JUDGE_CLIENT.get().cloned()
}
