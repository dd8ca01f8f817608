//! Connected platform accounts (/accounts)

use axum::{
    Router,
    extract::{Path, State},
    routing::{delete, get},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::envelope::{ApiError, ApiResponse};
use super::parse_platform;
use crate::AppState;
use crate::domain::Platform;
use crate::domain::accounts::{self, SocialAccount};
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/{platform}", delete(disconnect))
}

/// Account API response DTO. Tokens never leave the server.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub platform: Platform,
    pub platform_user_id: String,
    pub display_name: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    /// Token expired and cannot be refreshed; connect the platform again
    pub needs_reconnect: bool,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountResponse {
    pub fn from_account(a: SocialAccount, now: DateTime<Utc>) -> Self {
        Self {
            needs_reconnect: a.needs_reconnect(now),
            platform: a.platform,
            platform_user_id: a.platform_user_id,
            display_name: a.display_name,
            token_expires_at: a.expires_at,
            connected_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

impl From<SocialAccount> for AccountResponse {
    fn from(a: SocialAccount) -> Self {
        Self::from_account(a, Utc::now())
    }
}

/// GET /accounts
async fn list_accounts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<Vec<AccountResponse>>, ApiError> {
    let accounts = accounts::list_accounts(&state.db, user_id)
        .await
        .log_500("List accounts error")?;

    let now = Utc::now();
    Ok(ApiResponse::ok(
        accounts
            .into_iter()
            .map(|a| AccountResponse::from_account(a, now))
            .collect(),
    ))
}

/// DELETE /accounts/{platform}
async fn disconnect(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(platform): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    let platform = parse_platform(&platform)?;

    let deleted = accounts::delete_account(&state.db, user_id, platform)
        .await
        .log_500("Delete account error")?;
    if !deleted {
        return Err(ApiError::not_found(format!("{} is not connected", platform)));
    }

    tracing::info!(user_id, platform = %platform, "platform account disconnected");
    Ok(ApiResponse::ok(()).with_message("disconnected"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn account(
        platform: Platform,
        expires_at: DateTime<Utc>,
        refresh_token: Option<&str>,
    ) -> SocialAccount {
        SocialAccount {
            id: 1,
            user_id: 2,
            platform,
            platform_user_id: "UC1".into(),
            display_name: Some("Miso".into()),
            access_token: "secret-access".into(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            refresh_claimed_until: None,
            created_at: expires_at,
            updated_at: expires_at,
        }
    }

    #[test]
    fn response_omits_tokens() {
        let account = account(Platform::Youtube, Utc::now(), Some("secret-refresh"));
        let json = serde_json::to_string(&AccountResponse::from(account)).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains(r#""platform":"youtube""#));
    }

    #[test]
    fn flags_accounts_that_must_be_reconnected() {
        let now = Utc::now();
        let expired = now - Duration::hours(1);

        let refreshable = account(Platform::Youtube, expired, Some("rt"));
        assert!(!AccountResponse::from_account(refreshable, now).needs_reconnect);

        let no_refresh = account(Platform::Tiktok, expired, None);
        assert!(AccountResponse::from_account(no_refresh, now).needs_reconnect);

        let lapsed_meta = account(Platform::Instagram, expired, Some("long-lived"));
        let json =
            serde_json::to_string(&AccountResponse::from_account(lapsed_meta, now)).unwrap();
        assert!(json.contains(r#""needs_reconnect":true"#));

        let valid = account(Platform::Tiktok, now + Duration::hours(1), None);
        assert!(!AccountResponse::from_account(valid, now).needs_reconnect);
    }
}
