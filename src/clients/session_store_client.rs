//! Best-effort bridge to the external session store.
//!
//! When a room is reclaimed the relay pushes the materialized text so the
//! store holds the last-saved snapshot. This is a side store, never a source
//! of truth for live editing: failures are logged and swallowed, and the
//! merge stream does not depend on it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

static SESSION_STORE_CLIENT: OnceCell<Arc<SessionStoreClient>> = OnceCell::const_new();

const SERVICE_IDENTITY: &str = "codesync-relay";

#[derive(Debug)]
pub struct SessionStoreClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
    exp: usize,
}

#[derive(Serialize)]
struct SaveCodeRequest<'a> {
    code: &'a str,
}

impl SessionStoreClient {
    pub fn new(base_url: String, jwt_secret: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");
        Self {
            client,
            base_url,
            jwt_secret,
        }
    }

    fn generate_token(&self) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = Utc::now().timestamp() + 60;
        let claims = Claims {
            user_id: SERVICE_IDENTITY.to_string(),
            exp: expiration as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    /// Push the latest materialized text for a session. Best-effort: any
    /// failure is logged by the caller and otherwise ignored.
    pub async fn save_code(&self, session_id: &str, code: &str) -> Result<(), String> {
        let token = self
            .generate_token()
            .map_err(|e| format!("failed to sign service token: {}", e))?;
        let url = format!("{}/api/session/{}/code", self.base_url, session_id);
        let response = self
            .client
            .put(&url)
            .header("Cookie", format!("token={}", token))
            .json(&SaveCodeRequest { code })
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("session store replied {}", response.status()));
        }
        debug!(session = %session_id, bytes = code.len(), "snapshot pushed to session store");
        Ok(())
    }
}

/// Initialize the global SessionStoreClient
pub fn init_session_store_client(base_url: String, jwt_secret: String) -> Result<(), &'static str> {
    let client = SessionStoreClient::new(base_url, jwt_secret);
    SESSION_STORE_CLIENT
        .set(Arc::new(client))
        .map_err(|_| "SessionStoreClient already initialized")
}

/// Get the global SessionStoreClient instance
pub fn get_session_store_client() -> Option<Arc<SessionStoreClient>> {
    SESSION_STORE_CLIENT.get().cloned()
}

/// Push a swept room's snapshot, logging instead of propagating failures.
pub async fn push_snapshot(session_id: String, text: Option<String>) {
    let Some(client) = get_session_store_client() else {
        return;
    };
    let Some(text) = text else {
        debug!(session = %session_id, "room had no text to snapshot");
        return;
    };
    if let Err(e) = client.save_code(&session_id, &text).await {
        warn!(session = %session_id, %e, "best-effort snapshot push failed");
    }
}
