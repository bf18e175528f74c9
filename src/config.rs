use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3333";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_IDENTITY_PROVIDER_MODE: &str = "github";
const DEFAULT_GITHUB_OAUTH_BASE_URL: &str = "https://github.com";
const DEFAULT_GITHUB_API_BASE_URL: &str = "https://api.github.com";
const DEFAULT_MOCK_OAUTH_CODE: &str = "mock-code";
const DEFAULT_SESSION_TTL_SECONDS: u64 = 2_592_000;
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub identity_provider_mode: String,
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
    pub github_oauth_base_url: String,
    pub github_api_base_url: String,
    pub mock_oauth_code: String,
    pub session_signing_secret: Option<String>,
    pub session_ttl_seconds: u64,
    pub provider_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid MEMORIA_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("MEMORIA_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter = env::var("MEMORIA_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let identity_provider_mode = env::var("MEMORIA_IDENTITY_PROVIDER_MODE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IDENTITY_PROVIDER_MODE.to_string())
            .trim()
            .to_lowercase();

        let github_client_id = env::var("GITHUB_CLIENT_ID")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let github_client_secret = env::var("GITHUB_CLIENT_SECRET")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let github_oauth_base_url = env::var("MEMORIA_GITHUB_OAUTH_BASE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_GITHUB_OAUTH_BASE_URL.to_string());

        let github_api_base_url = env::var("MEMORIA_GITHUB_API_BASE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_BASE_URL.to_string());

        let mock_oauth_code = env::var("MEMORIA_MOCK_OAUTH_CODE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MOCK_OAUTH_CODE.to_string());

        let session_signing_secret = env::var("MEMORIA_SESSION_SIGNING_SECRET")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let session_ttl_seconds = env::var("MEMORIA_SESSION_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SESSION_TTL_SECONDS)
            .max(1);

        let provider_timeout_ms = env::var("MEMORIA_PROVIDER_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_MS)
            .max(100);

        let request_timeout_ms = env::var("MEMORIA_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)
            .max(1_000);

        let store_path = env::var("MEMORIA_STORE_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind_addr,
            log_filter,
            identity_provider_mode,
            github_client_id,
            github_client_secret,
            github_oauth_base_url,
            github_api_base_url,
            mock_oauth_code,
            session_signing_secret,
            session_ttl_seconds,
            provider_timeout_ms,
            request_timeout_ms,
            store_path,
        })
    }
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            identity_provider_mode: "mock".to_string(),
            github_client_id: None,
            github_client_secret: None,
            github_oauth_base_url: DEFAULT_GITHUB_OAUTH_BASE_URL.to_string(),
            github_api_base_url: DEFAULT_GITHUB_API_BASE_URL.to_string(),
            mock_oauth_code: DEFAULT_MOCK_OAUTH_CODE.to_string(),
            session_signing_secret: Some("memoria-test-signing-secret".to_string()),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            store_path: None,
        }
    }
}
