//! YouTube Data API v3. We download the video from storage and upload it with
//! a resumable session (metadata first, then the bytes in one PUT).

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::LOCATION;
use serde::{Deserialize, Serialize};

use super::oauth::{self, ClientAuth, OAuthClient, Provider};
use super::{
    PlatformClient, PlatformError, PlatformProfile, PublishRequest, PublishedPost, TokenGrant,
};
use crate::config::OAuthCredentials;
use crate::domain::Platform;

const API: &str = "https://www.googleapis.com/youtube/v3";
const UPLOAD_API: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const MAX_TITLE_CHARS: usize = 100;
const DEFAULT_TITLE: &str = "New video";

const PROVIDER: Provider = Provider {
    authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &[
        "https://www.googleapis.com/auth/youtube.upload",
        "https://www.googleapis.com/auth/youtube.readonly",
    ],
    scope_separator: " ",
    client_id_param: "client_id",
    client_auth: ClientAuth::Body,
    // Offline access plus forced consent so Google always returns a refresh token
    extra_params: &[("access_type", "offline"), ("prompt", "consent")],
};

#[derive(Clone)]
pub struct YoutubeClient {
    oauth: OAuthClient,
}

impl YoutubeClient {
    pub fn new(credentials: OAuthCredentials, http: Client) -> Self {
        Self {
            oauth: OAuthClient::new(PROVIDER, credentials, http),
        }
    }
}

#[derive(Debug, Serialize)]
struct VideoResource {
    snippet: Snippet,
    status: VideoStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatus {
    privacy_status: &'static str,
    self_declared_made_for_kids: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    snippet: Option<ChannelSnippet>,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    title: String,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Title is the caption's first line; the full caption goes in the description.
fn video_resource(caption: Option<&str>) -> VideoResource {
    let caption = caption.unwrap_or_default();
    let first_line = caption.lines().next().unwrap_or_default().trim();
    let title: String = if first_line.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        first_line.chars().take(MAX_TITLE_CHARS).collect()
    };

    VideoResource {
        snippet: Snippet {
            title,
            description: caption.to_string(),
        },
        status: VideoStatus {
            privacy_status: "private",
            self_declared_made_for_kids: false,
        },
    }
}

#[async_trait]
impl PlatformClient for YoutubeClient {
    fn platform(&self) -> Platform {
        Platform::Youtube
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
            .get(format!("{}/channels", API))
            .query(&[("part", "snippet"), ("mine", "true")])
            .bearer_auth(access_token)
            .send()
            .await?;
        let channels: ChannelList = oauth::check(resp).await?.json().await?;

        let channel = channels
            .items
            .into_iter()
            .next()
            .ok_or_else(|| {
                PlatformError::InvalidResponse("account has no YouTube channel".into())
            })?;

        Ok(PlatformProfile {
            id: channel.id,
            display_name: channel.snippet.map(|s| s.title),
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        request: &PublishRequest,
    ) -> Result<PublishedPost, PlatformError> {
        let http = self.oauth.http();

        let video = oauth::check(http.get(&request.video_url).send().await?)
            .await?
            .bytes()
            .await?;

        let session = http
            .post(UPLOAD_API)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(access_token)
            .header("X-Upload-Content-Type", &request.content_type)
            .header("X-Upload-Content-Length", video.len().to_string())
            .json(&video_resource(request.caption.as_deref()))
            .send()
            .await?;
        let session = oauth::check(session).await?;

        let upload_url = session
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::InvalidResponse("upload session has no Location".into())
            })?;

        let resp = http
            .put(upload_url)
            .bearer_auth(access_token)
            .header("Content-Type", &request.content_type)
            .body(video)
            .send()
            .await?;
        let uploaded: UploadedVideo = oauth::check(resp).await?.json().await?;

        Ok(PublishedPost {
            external_id: uploaded.id,
        })
    }
}
