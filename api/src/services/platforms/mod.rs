//! Social platform clients.
//!
//! Each supported platform implements [`PlatformClient`]. Handlers and jobs
//! never name a concrete client; they look one up in the [`PlatformRegistry`]
//! built from configuration at startup, which lets tests swap in fakes.

pub mod facebook;
pub mod instagram;
mod meta;
pub mod oauth;
pub mod tiktok;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config::OAuthCredentials;
use crate::domain::Platform;

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_DAYS: i64 = 60;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("{0} is not configured")]
    NotConfigured(Platform),
    #[error("account has no refresh token")]
    MissingRefreshToken,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Tokens returned by an authorization code exchange or refresh
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Absolute expiry. `expires_in` is remote input, so out of range values
    /// are an invalid response rather than an overflow.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, PlatformError> {
        let lifetime = match self.expires_in {
            Some(secs) if secs >= 0 => Duration::try_seconds(secs),
            Some(_) => None,
            None => Duration::try_days(DEFAULT_TOKEN_LIFETIME_DAYS),
        };
        lifetime
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                PlatformError::InvalidResponse(format!(
                    "expires_in out of range: {:?}",
                    self.expires_in
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformProfile {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Account id on the platform (channel, page, IG business account, open_id)
    pub platform_user_id: String,
    /// URL the platform (or we) can fetch the video bytes from
    pub video_url: String,
    pub content_type: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedPost {
    pub external_id: String,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Authorization URL the user is sent to. `code_challenge` is the PKCE S256 challenge.
    fn authorize_url(&self, state: &str, code_challenge: &str) -> String;

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, PlatformError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, PlatformError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<PlatformProfile, PlatformError>;

    async fn publish(
        &self,
        access_token: &str,
        request: &PublishRequest,
    ) -> Result<PublishedPost, PlatformError>;
}

/// Clients for every configured platform
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn from_config(credentials: &HashMap<Platform, OAuthCredentials>) -> Self {
        let http = Client::new();
        let mut registry = Self::default();
        for (platform, creds) in credentials {
            let client: Arc<dyn PlatformClient> = match platform {
                Platform::Tiktok => {
                    Arc::new(tiktok::TiktokClient::new(creds.clone(), http.clone()))
                }
                Platform::Youtube => {
                    Arc::new(youtube::YoutubeClient::new(creds.clone(), http.clone()))
                }
                Platform::Instagram => {
                    Arc::new(instagram::InstagramClient::new(creds.clone(), http.clone()))
                }
                Platform::Facebook => {
                    Arc::new(facebook::FacebookClient::new(creds.clone(), http.clone()))
                }
            };
            registry.insert(client);
        }
        registry
    }

    pub fn insert(&mut self, client: Arc<dyn PlatformClient>) {
        self.clients.insert(client.platform(), client);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        self.clients
            .get(&platform)
            .cloned()
            .ok_or(PlatformError::NotConfigured(platform))
    }

    /// Configured platforms in canonical order
    pub fn configured(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.clients.contains_key(p))
            .collect()
    }
}
