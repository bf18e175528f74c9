use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;

/// Profile data obtained from the OAuth provider, not yet mapped to an
/// internal user. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider_user_id: i64,
    pub login: String,
    pub name: String,
    pub avatar_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The provider rejected the exchange or the profile fetch. Terminal:
    /// the authorization code is single-use and already consumed.
    #[error("{message}")]
    Upstream { message: String },
    /// The provider answered but the payload violated the expected shape.
    #[error("{message}")]
    MalformedResponse { message: String },
    #[error("{message}")]
    Unavailable { message: String },
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges a one-time OAuth authorization code for the provider's
    /// view of the user. Two outbound calls, no local state mutation.
    async fn authenticate(&self, code: &str) -> Result<ExternalIdentity, IdentityError>;

    fn name(&self) -> &'static str;
}

pub fn provider_from_config(config: &Config) -> Arc<dyn IdentityProvider> {
    match config.identity_provider_mode.as_str() {
        "mock" => Arc::new(MockIdentityProvider {
            code: config.mock_oauth_code.clone(),
        }),
        _ => github_or_unavailable(config),
    }
}

fn github_or_unavailable(config: &Config) -> Arc<dyn IdentityProvider> {
    if let (Some(client_id), Some(client_secret)) = (
        config.github_client_id.clone(),
        config.github_client_secret.clone(),
    ) {
        Arc::new(GithubIdentityProvider::new(
            client_id,
            client_secret,
            config.github_oauth_base_url.clone(),
            config.github_api_base_url.clone(),
            Duration::from_millis(config.provider_timeout_ms),
        ))
    } else {
        Arc::new(UnavailableIdentityProvider {
            message:
                "GitHub identity provider is required. Configure GITHUB_CLIENT_ID and GITHUB_CLIENT_SECRET or use MEMORIA_IDENTITY_PROVIDER_MODE=mock only for local/testing."
                    .to_string(),
        })
    }
}

#[derive(Debug, Clone)]
struct GithubIdentityProvider {
    client_id: String,
    client_secret: String,
    oauth_base_url: String,
    api_base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
struct MockIdentityProvider {
    code: String,
}

#[derive(Debug, Clone)]
struct UnavailableIdentityProvider {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GithubAccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUserResponse {
    id: Option<i64>,
    login: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
}

impl GithubIdentityProvider {
    fn new(
        client_id: String,
        client_secret: String,
        oauth_base_url: String,
        api_base_url: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            oauth_base_url,
            api_base_url,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError> {
        let url = format!(
            "{}/login/oauth/access_token",
            self.oauth_base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
            ])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| IdentityError::Upstream {
                message: format!("Unable to contact GitHub for token exchange: {error}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Upstream {
                message: format!("GitHub token exchange failed ({status}): {body}"),
            });
        }

        let payload: GithubAccessTokenResponse =
            response
                .json()
                .await
                .map_err(|error| IdentityError::MalformedResponse {
                    message: format!("Invalid GitHub token exchange payload: {error}"),
                })?;

        if let Some(error) = payload.error {
            let description = payload.error_description.unwrap_or_default();
            return Err(IdentityError::Upstream {
                message: format!("GitHub rejected the authorization code ({error}): {description}"),
            });
        }

        payload
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| IdentityError::MalformedResponse {
                message: "GitHub token exchange payload is missing access_token".to_string(),
            })
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalIdentity, IdentityError> {
        let url = format!("{}/user", self.api_base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, "memoria-service")
            .send()
            .await
            .map_err(|error| IdentityError::Upstream {
                message: format!("Unable to contact GitHub for the user profile: {error}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Upstream {
                message: format!("GitHub profile fetch failed ({status}): {body}"),
            });
        }

        let payload: GithubUserResponse =
            response
                .json()
                .await
                .map_err(|error| IdentityError::MalformedResponse {
                    message: format!("Invalid GitHub profile payload: {error}"),
                })?;

        normalize_profile(payload)
    }
}

fn normalize_profile(payload: GithubUserResponse) -> Result<ExternalIdentity, IdentityError> {
    let provider_user_id = payload.id.ok_or_else(|| IdentityError::MalformedResponse {
        message: "GitHub profile payload is missing id".to_string(),
    })?;

    let login = required_field(payload.login, "login")?;
    let name = required_field(payload.name, "name")?;
    let avatar_url = required_field(payload.avatar_url, "avatar_url")?;

    if !is_http_url(&avatar_url) {
        return Err(IdentityError::MalformedResponse {
            message: format!("GitHub profile avatar_url is not a valid URL: {avatar_url}"),
        });
    }

    Ok(ExternalIdentity {
        provider_user_id,
        login,
        name,
        avatar_url,
    })
}

fn required_field(value: Option<String>, field: &str) -> Result<String, IdentityError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| IdentityError::MalformedResponse {
            message: format!("GitHub profile payload is missing {field}"),
        })
}

fn is_http_url(value: &str) -> bool {
    let rest = match value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    !rest.is_empty() && !rest.starts_with('/') && !rest.contains(char::is_whitespace)
}

#[async_trait]
impl IdentityProvider for GithubIdentityProvider {
    async fn authenticate(&self, code: &str) -> Result<ExternalIdentity, IdentityError> {
        let access_token = self.exchange_code(code).await?;
        self.fetch_profile(&access_token).await
    }

    fn name(&self) -> &'static str {
        "github"
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn authenticate(&self, code: &str) -> Result<ExternalIdentity, IdentityError> {
        if code.trim() != self.code {
            return Err(IdentityError::Upstream {
                message: "Mock provider rejected the authorization code.".to_string(),
            });
        }

        Ok(ExternalIdentity {
            provider_user_id: 583231,
            login: "octocat".to_string(),
            name: "The Octocat".to_string(),
            avatar_url: "https://avatars.githubusercontent.com/u/583231?v=4".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[async_trait]
impl IdentityProvider for UnavailableIdentityProvider {
    async fn authenticate(&self, _code: &str) -> Result<ExternalIdentity, IdentityError> {
        Err(IdentityError::Unavailable {
            message: self.message.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "github"
    }
}
