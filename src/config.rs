use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Relay WebSocket port; defaults to the API port + 1
    pub ws_port: Option<u16>,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JWT secret shared with the account service
    pub jwt_secret: Option<String>,

    /// Grace interval before an empty room is reclaimed, in seconds
    #[serde(default = "default_room_grace_secs")]
    pub room_grace_secs: u64,

    /// Base URL of the external code execution judge
    #[serde(default = "default_judge_api_url")]
    pub judge_api_url: String,

    /// API key for the judge, if it requires one
    pub judge_api_key: Option<String>,

    /// Base URL of the session store for best-effort snapshot pushes
    pub session_store_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full HTTP server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Port the relay WebSocket server binds to
    pub fn websocket_port(&self) -> u16 {
        self.ws_port.unwrap_or_else(|| self.port.saturating_add(1))
    }

    pub fn is_development(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "dev" | "development")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_port: None,
            environment: default_environment(),
            cors_origins: None,
            log_level: default_log_level(),
            jwt_secret: None,
            room_grace_secs: default_room_grace_secs(),
            judge_api_url: default_judge_api_url(),
            judge_api_key: None,
            session_store_url: None,
        }
    }
}

/// Install the process-wide configuration. Later calls are ignored, which
/// lets tests seed their own instance before starting a server.
pub fn init_config(config: Config) -> &'static Config {
    CONFIG.get_or_init(|| config)
}

pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_room_grace_secs() -> u64 {
    30
}

fn default_judge_api_url() -> String {
    "https://judge0-ce.p.rapidapi.com".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_port_defaults_to_api_port_plus_one() {
        let config = Config::default();
        assert_eq!(config.websocket_port(), config.port + 1);

        let explicit = Config {
            ws_port: Some(9000),
            ..Config::default()
        };
        assert_eq!(explicit.websocket_port(), 9000);
    }

    #[test]
    fn websocket_port_saturates_at_the_port_ceiling() {
        let config = Config {
            port: u16::MAX,
            ..Config::default()
        };
        assert_eq!(config.websocket_port(), u16::MAX);
    }
}
