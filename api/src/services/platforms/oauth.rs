//! OAuth 2.0 plumbing shared by the platform clients: PKCE, state, token requests.

use base64::Engine;
use rand::Rng;
use reqwest::{Client, Response};
use sha2::{Digest, Sha256};

use super::{PlatformError, TokenGrant};
use crate::config::OAuthCredentials;

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a PKCE code verifier and challenge
pub fn generate_pkce() -> Pkce {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(verifier_bytes);
    let challenge = code_challenge(&verifier);
    Pkce { verifier, challenge }
}

/// SHA256 of the verifier, base64url encoded without padding
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Random state for CSRF protection
pub fn generate_state() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn percent_encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}

/// Turn a non-2xx response into [`PlatformError::Api`] with the body attached.
pub async fn check(resp: Response) -> Result<Response, PlatformError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PlatformError::Api {
        status: status.as_u16(),
        body,
    })
}

/// How client credentials travel on token requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `Authorization: Basic base64(id:secret)`
    Basic,
    /// id and secret as form fields
    Body,
}

/// Static description of a provider's OAuth endpoints
#[derive(Debug, Clone, Copy)]
pub struct Provider {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
    pub scope_separator: &'static str,
    /// Name of the client id parameter (`client_key` for TikTok)
    pub client_id_param: &'static str,
    pub client_auth: ClientAuth,
    /// Extra authorize parameters, e.g. Google's `access_type=offline`
    pub extra_params: &'static [(&'static str, &'static str)],
}

#[derive(Clone)]
pub struct OAuthClient {
    provider: Provider,
    credentials: OAuthCredentials,
    http: Client,
}

impl OAuthClient {
    pub fn new(provider: Provider, credentials: OAuthCredentials, http: Client) -> Self {
        Self {
            provider,
            credentials,
            http,
        }
    }

    pub fn credentials(&self) -> &OAuthCredentials {
        &self.credentials
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn authorize_url(&self, state: &str, code_challenge: &str) -> String {
        let scope = self
            .provider
            .scopes
            .iter()
            .map(|s| percent_encode(s))
            .collect::<Vec<_>>()
            .join(&percent_encode(self.provider.scope_separator));

        let mut url = format!(
            "{}?response_type=code&{}={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.provider.authorize_url,
            self.provider.client_id_param,
            percent_encode(&self.credentials.client_id),
            percent_encode(&self.credentials.redirect_uri),
            scope,
            percent_encode(state),
            percent_encode(code_challenge)
        );
        for (key, value) in self.provider.extra_params {
            url.push_str(&format!("&{}={}", key, percent_encode(value)));
        }
        url
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, PlatformError> {
        self.token_request(&[
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    /// Standard `refresh_token` grant
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, PlatformError> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    /// POST a form to the token endpoint with client authentication applied
    pub async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, PlatformError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        let mut request = self.http.post(self.provider.token_url);

        match self.provider.client_auth {
            ClientAuth::Basic => {
                request = request.header("Authorization", self.basic_auth_header());
            }
            ClientAuth::Body => {
                form.push((self.provider.client_id_param, self.credentials.client_id.as_str()));
                form.push(("client_secret", self.credentials.client_secret.as_str()));
            }
        }

        let resp = check(request.form(&form).send().await?).await?;
        let grant: TokenGrant = resp.json().await?;
        Ok(grant)
    }

    fn basic_auth_header(&self) -> String {
        let credentials = format!(
            "{}:{}",
            self.credentials.client_id, self.credentials.client_secret
        );
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }
}
