//! TikTok Content Posting API. TikTok pulls the video itself from our URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::oauth::{self, ClientAuth, OAuthClient, Provider};
use super::{
    PlatformClient, PlatformError, PlatformProfile, PublishRequest, PublishedPost, TokenGrant,
};
use crate::config::OAuthCredentials;
use crate::domain::Platform;

const API: &str = "https://open.tiktokapis.com/v2";
/// TikTok caps titles well below our caption limit
const MAX_TITLE_CHARS: usize = 150;

const PROVIDER: Provider = Provider {
    authorize_url: "https://www.tiktok.com/v2/auth/authorize/",
    token_url: "https://open.tiktokapis.com/v2/oauth/token/",
    scopes: &["user.info.basic", "video.publish"],
    scope_separator: ",",
    client_id_param: "client_key",
    client_auth: ClientAuth::Body,
    extra_params: &[],
};

#[derive(Clone)]
pub struct TiktokClient {
    oauth: OAuthClient,
}

impl TiktokClient {
    pub fn new(credentials: OAuthCredentials, http: Client) -> Self {
        Self {
            oauth: OAuthClient::new(PROVIDER, credentials, http),
        }
    }
}

#[derive(Debug, Serialize)]
struct InitRequest<'a> {
    post_info: PostInfo<'a>,
    source_info: SourceInfo<'a>,
}

#[derive(Debug, Serialize)]
struct PostInfo<'a> {
    title: String,
    privacy_level: &'a str,
}

#[derive(Debug, Serialize)]
struct SourceInfo<'a> {
    source: &'a str,
    video_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct InitData {
    publish_id: String,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: TiktokUser,
}

#[derive(Debug, Deserialize)]
struct TiktokUser {
    open_id: String,
    #[serde(default)]
    display_name: Option<String>,
}

fn title_from(caption: Option<&str>) -> String {
    caption.unwrap_or_default().chars().take(MAX_TITLE_CHARS).collect()
}

#[async_trait]
impl PlatformClient for TiktokClient {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    fn authorize_url(&self, state: &str, code_challenge: &str) -> String {
        self.oauth.authorize_url(state, code_challenge)
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, PlatformError> {
        self.oauth.exchange_code(code, code_verifier).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, PlatformError> {
        self.oauth.refresh(refresh_token).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<PlatformProfile, PlatformError> {
        let resp = self
            .oauth
            .http()
            .get(format!("{}/user/info/", API))
            .query(&[("fields", "open_id,display_name")])
            .bearer_auth(access_token)
            .send()
            .await?;
        let body: Envelope<UserData> = oauth::check(resp).await?.json().await?;

        Ok(PlatformProfile {
            id: body.data.user.open_id,
            display_name: body.data.user.display_name,
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        request: &PublishRequest,
    ) -> Result<PublishedPost, PlatformError> {
        let body = InitRequest {
            post_info: PostInfo {
                title: title_from(request.caption.as_deref()),
                privacy_level: "SELF_ONLY",
            },
            source_info: SourceInfo {
                source: "PULL_FROM_URL",
                video_url: &request.video_url,
            },
        };

        let resp = self
            .oauth
            .http()
            .post(format!("{}/post/publish/video/init/", API))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        let init: Envelope<InitData> = oauth::check(resp).await?.json().await?;

        Ok(PublishedPost {
            external_id: init.data.publish_id,
        })
    }
}
