//! Facebook Pages: videos are published to the first Page the user manages.

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
    "pages_show_list",
    "pages_read_engagement",
    "pages_manage_posts",
    "publish_video",
];

#[derive(Clone)]
pub struct FacebookClient {
    login: MetaLogin,
}

impl FacebookClient {
    pub fn new(credentials: OAuthCredentials, http: Client) -> Self {
        Self {
            login: MetaLogin::new(SCOPES, credentials, http),
        }
    }

    /// Page access token, which is what `/{page}/videos` requires
    async fn page_token(&self, page_id: &str, user_token: &str) -> Result<String, PlatformError> {
        #[derive(Deserialize)]
        struct PageToken {
            access_token: Option<String>,
        }

        let resp = self
            .login
            .http()
            .get(format!("{}/{}", GRAPH_API, page_id))
            .query(&[("fields", "access_token"), ("access_token", user_token)])
            .send()
            .await?;
        let page: PageToken = oauth::check(resp).await?.json().await?;
        page.access_token.ok_or_else(|| {
            PlatformError::InvalidResponse(format!("no access token for page {}", page_id))
        })
    }
}

#[async_trait]
impl PlatformClient for FacebookClient {
    fn platform(&self) -> Platform {
        Platform::Facebook
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
        let pages = meta::list_pages(self.login.http(), access_token, "id,name").await?;
        let page = pages
            .into_iter()
            .next()
            .ok_or_else(|| {
                PlatformError::InvalidResponse("no Facebook Page on this account".into())
            })?;
        Ok(PlatformProfile {
            id: page.id,
            display_name: page.name,
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        request: &PublishRequest,
    ) -> Result<PublishedPost, PlatformError> {
        let page_token = self.page_token(&request.platform_user_id, access_token).await?;
        let description = request.caption.as_deref().unwrap_or_default();

        let resp = self
            .login
            .http()
            .post(format!("{}/{}/videos", GRAPH_API, request.platform_user_id))
            .form(&[
                ("file_url", request.video_url.as_str()),
                ("description", description),
                ("access_token", page_token.as_str()),
            ])
            .send()
            .await?;
        let created: IdResponse = oauth::check(resp).await?.json().await?;

        Ok(PublishedPost {
            external_id: created.id,
        })
    }
}
