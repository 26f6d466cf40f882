//! Credentials and endpoints read from the environment.

use cibridge_core::BridgeError;
use cibridge_forge::{
    CachedToken, GitHubClient, GitLabClient, GitLabConfig, InstallationTokenSource, StaticToken,
};

pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GITHUB_URL: &str = "https://github.com";

/// How to authenticate against GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubCredentials {
    /// `GITHUB_API_TOKEN`
    Token(String),
    /// `GITHUB_APP_JWT` exchanged for an installation token
    App { jwt: String, installation_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub gitlab_url: String,
    pub gitlab_token: Option<String>,
    pub github_api_url: String,
    pub github_url: String,
    pub github: Option<GitHubCredentials>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let github = match get("GITHUB_API_TOKEN") {
            Some(token) => Some(GitHubCredentials::Token(token)),
            None => match (get("GITHUB_APP_JWT"), get("GITHUB_INSTALLATION_ID")) {
                (Some(jwt), Some(id)) => id
                    .trim()
                    .parse()
                    .ok()
                    .map(|installation_id| GitHubCredentials::App {
                        jwt,
                        installation_id,
                    }),
                _ => None,
            },
        };
        BridgeConfig {
            gitlab_url: get("GITLAB_URL").unwrap_or_else(|| DEFAULT_GITLAB_URL.to_string()),
            gitlab_token: get("GITLAB_API_TOKEN"),
            github_api_url: get("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            github_url: get("GITHUB_URL").unwrap_or_else(|| DEFAULT_GITHUB_URL.to_string()),
            github,
        }
    }

    pub fn with_gitlab_url(mut self, url: &str) -> Self {
        self.gitlab_url = url.trim_end_matches('/').to_string();
        self
    }

    /// GitLab settings, or an `Internal` error when no token is configured.
    pub fn gitlab(&self) -> Result<GitLabConfig, BridgeError> {
        let token = self
            .gitlab_token
            .as_deref()
            .ok_or_else(|| BridgeError::Internal("cannot find GITLAB_API_TOKEN".to_string()))?;
        Ok(GitLabConfig::new(&self.gitlab_url, token))
    }

    pub fn github_credentials(&self) -> Result<&GitHubCredentials, BridgeError> {
        self.github.as_ref().ok_or_else(|| {
            BridgeError::Internal(
                "cannot find GITHUB_API_TOKEN or GITHUB_APP_JWT with GITHUB_INSTALLATION_ID"
                    .to_string(),
            )
        })
    }

    pub fn gitlab_client(&self) -> anyhow::Result<GitLabClient> {
        let config = self.gitlab()?;
        Ok(GitLabClient::new(config).map_err(invalid_endpoint)?)
    }

    pub fn github_client(&self) -> anyhow::Result<GitHubClient> {
        let tokens = match self.github_credentials()? {
            GitHubCredentials::Token(token) => CachedToken::new(StaticToken::new(token.clone())),
            GitHubCredentials::App {
                jwt,
                installation_id,
            } => CachedToken::new(
                InstallationTokenSource::new(&self.github_api_url, jwt.clone(), *installation_id)
                    .map_err(invalid_endpoint)?,
            ),
        };
        Ok(GitHubClient::new(&self.github_api_url, tokens).map_err(invalid_endpoint)?)
    }
}

fn invalid_endpoint(err: cibridge_forge::ForgeError) -> BridgeError {
    BridgeError::Configuration(err.to_string())
}
