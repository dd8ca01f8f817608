//! Instagram Reels through the Instagram Graph API (business accounts linked to a Page).
//!
//! Publishing is a three step dance: create a REELS container pointing at the
//! video URL, wait for Instagram to finish ingesting it, then publish the container.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::meta::{self, GRAPH_API, IdResponse, MetaLogin};
use super::oauth;
use super::{
    PlatformClient, PlatformError, PlatformProfile, PublishRequest, PublishedPost, TokenGrant,
};
use crate::config::OAuthCredentials;
use crate::domain::Platform;

const SCOPES: &[&str] = &[
    "instagram_basic",
    "instagram_content_publish",
    "pages_show_list",
    "pages_read_engagement",
];

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);
const STATUS_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerStatus {
    InProgress,
    Finished,
    Failed,
}

impl ContainerStatus {
    fn parse(code: &str) -> Self {
        match code {
            "FINISHED" | "PUBLISHED" => ContainerStatus::Finished,
            "ERROR" | "EXPIRED" => ContainerStatus::Failed,
            _ => ContainerStatus::InProgress,
        }
    }
}

#[derive(Clone)]
pub struct InstagramClient {
    login: MetaLogin,
}

impl InstagramClient {
    pub fn new(credentials: OAuthCredentials, http: Client) -> Self {
        Self {
            login: MetaLogin::new(SCOPES, credentials, http),
        }
    }

    async fn create_container(
        &self,
        access_token: &str,
        request: &PublishRequest,
    ) -> Result<String, PlatformError> {
        let caption = request.caption.as_deref().unwrap_or_default();
        let resp = self
            .login
            .http()
            .post(format!("{}/{}/media", GRAPH_API, request.platform_user_id))
            .form(&[
                ("media_type", "REELS"),
                ("video_url", request.video_url.as_str()),
                ("caption", caption),
                ("access_token", access_token),
            ])
            .send()
            .await?;
        let container: IdResponse = oauth::check(resp).await?.json().await?;
        Ok(container.id)
    }

    async fn wait_until_ready(
        &self,
        access_token: &str,
        container_id: &str,
    ) -> Result<(), PlatformError> {
        #[derive(Deserialize)]
        struct StatusResponse {
            status_code: Option<String>,
        }

        for _ in 0..STATUS_POLL_ATTEMPTS {
            let resp = self
                .login
                .http()
                .get(format!("{}/{}", GRAPH_API, container_id))
                .query(&[("fields", "status_code"), ("access_token", access_token)])
                .send()
                .await?;
            let status: StatusResponse = oauth::check(resp).await?.json().await?;

            match ContainerStatus::parse(status.status_code.as_deref().unwrap_or_default()) {
                ContainerStatus::Finished => return Ok(()),
                ContainerStatus::Failed => {
                    return Err(PlatformError::InvalidResponse(format!(
                        "media container {} failed processing",
                        container_id
                    )));
                }
                ContainerStatus::InProgress => tokio::time::sleep(STATUS_POLL_INTERVAL).await,
            }
        }

        Err(PlatformError::InvalidResponse(format!(
            "media container {} still processing",
            container_id
        )))
    }
}

#[async_trait]
impl PlatformClient for InstagramClient {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn authorize_url(&self, state: &str, code_challenge: &str) -> String {
        self.login.authorize_url(state, code_challenge)
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, PlatformError> {
        self.login.exchange_code(code, code_verifier).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, PlatformError> {
        self.login.long_lived(refresh_token).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<PlatformProfile, PlatformError> {
        let pages = meta::list_pages(
            self.login.http(),
            access_token,
            "id,instagram_business_account{id,username}",
        )
        .await?;

        let account = pages
            .into_iter()
            .find_map(|page| page.instagram_business_account)
            .ok_or_else(|| {
                PlatformError::InvalidResponse(
                    "no Instagram business account linked to a Page".into(),
                )
            })?;

        Ok(PlatformProfile {
            id: account.id,
            display_name: account.username,
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        request: &PublishRequest,
    ) -> Result<PublishedPost, PlatformError> {
        let container_id = self.create_container(access_token, request).await?;
        self.wait_until_ready(access_token, &container_id).await?;

        let resp = self
            .login
            .http()
            .post(format!("{}/{}/media_publish", GRAPH_API, request.platform_user_id))
            .form(&[
                ("creation_id", container_id.as_str()),
                ("access_token", access_token),
            ])
            .send()
            .await?;
        let media: IdResponse = oauth::check(resp).await?.json().await?;

        tracing::debug!(container_id, media_id = %media.id, "Instagram reel published");
        Ok(PublishedPost {
            external_id: media.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_status_codes() {
        assert_eq!(ContainerStatus::parse("FINISHED"), ContainerStatus::Finished);
        assert_eq!(ContainerStatus::parse("IN_PROGRESS"), ContainerStatus::InProgress);
        assert_eq!(ContainerStatus::parse(""), ContainerStatus::InProgress);
        assert_eq!(ContainerStatus::parse("ERROR"), ContainerStatus::Failed);
        assert_eq!(ContainerStatus::parse("EXPIRED"), ContainerStatus::Failed);
    }
}
