use std::fmt;

use crate::crypto::TokenAlgorithm;
use crate::error::AppError;

pub const DEFAULT_ASSISTANT_URL: &str = "https://api.us-south.assistant.watson.cloud.ibm.com";
pub const DEFAULT_ASSISTANT_VERSION: &str = "2020-04-01";
/// Upper bound for `TOKEN_EXPIRY_HOURS` (one year).
pub const MAX_TOKEN_EXPIRY_HOURS: u32 = 24 * 365;

#[derive(Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub request_timeout_secs: u64,
    pub assistant: AssistantConfig,
    pub token: TokenConfig,
}

/// Connection settings for the remote assistant service.
#[derive(Clone)]
pub struct AssistantConfig {
    pub api_key: String,
    pub assistant_id: String,
    pub version: String,
    pub service_url: String,
    /// Pre-existing remote session used by the `/test` endpoint.
    pub test_session: Option<String>,
}

#[derive(Clone)]
pub struct TokenConfig {
    pub secret: Vec<u8>,
    pub algorithm: TokenAlgorithm,
    pub expiry_hours: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        // A missing .env file is not fatal; values may come from the real environment.
        if let Err(e) = dotenvy::dotenv() {
            tracing::warn!("No .env file loaded ({}), using process environment", e);
        }

        Ok(Config {
            server_host: std::env::var("SERVER_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: parse_var("SERVER_PORT", "8080")?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://assistant_relay.db?mode=rwc".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            db_min_connections: parse_var("DB_MIN_CONNECTIONS", "1")?,
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", "30")?,
            assistant: AssistantConfig {
                api_key: required_var("ASSISTANT_API_KEY")?,
                assistant_id: required_var("ASSISTANT_ID")?,
                version: std::env::var("ASSISTANT_VERSION")
                    .unwrap_or_else(|_| DEFAULT_ASSISTANT_VERSION.to_string()),
                service_url: std::env::var("ASSISTANT_URL")
                    .unwrap_or_else(|_| DEFAULT_ASSISTANT_URL.to_string()),
                test_session: std::env::var("ASSISTANT_TEST_SESSION")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            },
            token: TokenConfig {
                secret: token_secret(),
                algorithm: std::env::var("TOKEN_ALGORITHM")
                    .unwrap_or_else(|_| "HS256".to_string())
                    .parse()
                    .map_err(|e| AppError::Config(format!("Invalid TOKEN_ALGORITHM: {}", e)))?,
                expiry_hours: parse_expiry_hours(
                    &std::env::var("TOKEN_EXPIRY_HOURS").unwrap_or_else(|_| "24".to_string()),
                )?,
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &"<redacted>")
            .field("assistant_id", &self.assistant_id)
            .field("version", &self.version)
            .field("service_url", &self.service_url)
            .field("test_session", &self.test_session)
            .finish()
    }
}

fn required_var(name: &str) -> Result<String, AppError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Config(format!("{} must be set", name))),
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e)))
}

fn parse_expiry_hours(raw: &str) -> Result<u32, AppError> {
    let hours: u32 = raw
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid TOKEN_EXPIRY_HOURS: {}", e)))?;

    if hours == 0 || hours > MAX_TOKEN_EXPIRY_HOURS {
        return Err(AppError::Config(format!(
            "Invalid TOKEN_EXPIRY_HOURS: must be between 1 and {}, got {}",
            MAX_TOKEN_EXPIRY_HOURS, hours
        )));
    }
    Ok(hours)
}

fn token_secret() -> Vec<u8> {
    match std::env::var("TOKEN_SECRET") {
        Ok(secret) if !secret.is_empty() => secret.into_bytes(),
        _ => {
            tracing::warn!("TOKEN_SECRET not set, generating an ephemeral secret; tokens will not survive a restart");
            crate::crypto::generate_secret().to_vec()
        }
    }
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            db_min_connections: 1,
            request_timeout_secs: 5,
            assistant: AssistantConfig {
                api_key: "test-key".to_string(),
                assistant_id: "test-assistant".to_string(),
                version: DEFAULT_ASSISTANT_VERSION.to_string(),
                service_url: "http://127.0.0.1:9".to_string(),
                test_session: None,
            },
            token: TokenConfig {
                secret: b"test-secret".to_vec(),
                algorithm: TokenAlgorithm::HS256,
                expiry_hours: 1,
            },
        }
    }
}
