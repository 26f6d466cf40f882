//! API token providers.
//!
//! A [`TokenSource`] mints tokens; [`CachedToken`] keeps the last one and
//! mints a fresh token only once the cached one is about to expire. Static
//! personal tokens never expire. GitHub App installation tokens are minted by
//! exchanging an app JWT and expire after an hour.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ForgeError, Result};
use crate::http;

/// A token and the moment it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssuedToken {
    /// Still usable at `now`, keeping `skew` in reserve.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => {
                let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
                now + skew < expires_at
            }
        }
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn mint(&self) -> Result<IssuedToken>;
}

/// A fixed personal access token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn mint(&self) -> Result<IssuedToken> {
        Ok(IssuedToken {
            token: self.0.clone(),
            expires_at: None,
        })
    }
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges a GitHub App JWT for an installation access token.
///
/// The JWT itself is produced outside the bridge and handed in as is.
pub struct InstallationTokenSource {
    http: reqwest::Client,
    api_url: Url,
    app_jwt: String,
    installation_id: u64,
}

impl InstallationTokenSource {
    pub fn new(api_url: &str, app_jwt: impl Into<String>, installation_id: u64) -> Result<Self> {
        Ok(InstallationTokenSource {
            http: http::build_client()?,
            api_url: http::parse_base(api_url, &[])?,
            app_jwt: app_jwt.into(),
            installation_id,
        })
    }
}

#[async_trait]
impl TokenSource for InstallationTokenSource {
    async fn mint(&self) -> Result<IssuedToken> {
        let id = self.installation_id.to_string();
        let url = http::join(&self.api_url, &["app", "installations", id.as_str(), "access_tokens"])?;
        debug!(installation_id = self.installation_id, "Request installation token");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.app_jwt)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;
        if response.status().as_u16() != 201 {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::Auth(format!(
                "installation token exchange returned HTTP {status}: {body}"
            )));
        }
        let issued: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::Decode(e.to_string()))?;
        info!(expires_at = %issued.expires_at, "Minted installation token");
        Ok(IssuedToken {
            token: issued.token,
            expires_at: Some(issued.expires_at),
        })
    }
}

/// Caches the token of a [`TokenSource`] until shortly before it expires.
pub struct CachedToken {
    source: Box<dyn TokenSource>,
    skew: Duration,
    current: Mutex<Option<IssuedToken>>,
}

impl CachedToken {
    /// Tokens are refreshed one minute before they expire.
    pub const DEFAULT_SKEW: Duration = Duration::from_secs(60);

    pub fn new(source: impl TokenSource + 'static) -> Self {
        CachedToken {
            source: Box::new(source),
            skew: Self::DEFAULT_SKEW,
            current: Mutex::new(None),
        }
    }

    /// A token valid right now, minting one if needed.
    pub async fn valid_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if token.is_valid_at(Utc::now(), self.skew) {
                return Ok(token.token.clone());
            }
            debug!("Cached token expired, minting a new one");
        }
        let fresh = self.source.mint().await?;
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }
}
