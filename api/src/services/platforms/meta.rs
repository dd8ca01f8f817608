//! Facebook Login and Graph API pieces shared by Facebook and Instagram.
//!
//! Meta issues no refresh tokens. A short-lived user token is exchanged for a
//! long-lived one (about 60 days), and a long-lived token is renewed by the same
//! `fb_exchange_token` grant, so the long-lived token doubles as the refresh token.

use reqwest::Client;
use serde::Deserialize;

use super::oauth::{self, ClientAuth, OAuthClient, Provider};
use super::{PlatformError, TokenGrant};
use crate::config::OAuthCredentials;

pub const GRAPH_API: &str = "https://graph.facebook.com/v21.0";

pub const fn provider(scopes: &'static [&'static str]) -> Provider {
    Provider {
        authorize_url: "https://www.facebook.com/v21.0/dialog/oauth",
        token_url: "https://graph.facebook.com/v21.0/oauth/access_token",
        scopes,
        scope_separator: ",",
        client_id_param: "client_id",
        client_auth: ClientAuth::Body,
        extra_params: &[],
    }
}

#[derive(Clone)]
pub struct MetaLogin {
    oauth: OAuthClient,
}

impl MetaLogin {
    pub fn new(
        scopes: &'static [&'static str],
        credentials: OAuthCredentials,
        http: Client,
    ) -> Self {
        Self {
            oauth: OAuthClient::new(provider(scopes), credentials, http),
        }
    }

    pub fn http(&self) -> &Client {
        self.oauth.http()
    }

    pub fn authorize_url(&self, state: &str, code_challenge: &str) -> String {
        self.oauth.authorize_url(state, code_challenge)
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, PlatformError> {
        let short = self.oauth.exchange_code(code, code_verifier).await?;
        self.long_lived(&short.access_token).await
    }

    /// Exchange any valid user token for a fresh long-lived one
    pub async fn long_lived(&self, token: &str) -> Result<TokenGrant, PlatformError> {
        let grant = self
            .oauth
            .token_request(&[
                ("grant_type", "fb_exchange_token"),
                ("fb_exchange_token", token),
            ])
            .await?;
        Ok(as_refreshable(grant))
    }
}

fn as_refreshable(grant: TokenGrant) -> TokenGrant {
    TokenGrant {
        refresh_token: Some(grant.access_token.clone()),
        ..grant
    }
}

#[derive(Debug, Deserialize)]
pub struct Paged<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct InstagramAccount {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// A Facebook Page the user manages
#[derive(Debug, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub instagram_business_account: Option<InstagramAccount>,
}

#[derive(Debug, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

/// Pages the token's user manages, with the requested fields
pub async fn list_pages(
    http: &Client,
    access_token: &str,
    fields: &str,
) -> Result<Vec<Page>, PlatformError> {
    let resp = http
        .get(format!("{}/me/accounts", GRAPH_API))
        .query(&[("fields", fields), ("access_token", access_token)])
        .send()
        .await?;
    let pages: Paged<Page> = oauth::check(resp).await?.json().await?;
    Ok(pages.data)
}
