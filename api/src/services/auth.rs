//! Platform token refresh shared by the dispatch and token refresh jobs

use chrono::{DateTime, Utc};

use crate::domain::accounts::SocialAccount;
use crate::services::platforms::{PlatformClient, PlatformError};

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// The platform's rotated refresh token, or the one we already had
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Ask the platform for fresh tokens for `account`.
pub async fn refresh_account_tokens(
    client: &dyn PlatformClient,
    account: &SocialAccount,
    now: DateTime<Utc>,
) -> Result<RefreshedTokens, PlatformError> {
    let refresh_token = account
        .refresh_token
        .as_deref()
        .ok_or(PlatformError::MissingRefreshToken)?;

    let grant = client.refresh_token(refresh_token).await?;
    let expires_at = grant.expires_at(now)?;

    Ok(RefreshedTokens {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token.or_else(|| account.refresh_token.clone()),
        expires_at,
    })
}
