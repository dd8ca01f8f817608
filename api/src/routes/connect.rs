//! Platform OAuth endpoints (/connect/{platform}/*)

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::accounts::AccountResponse;
use super::auth::AuthUser;
use super::envelope::{ApiError, ApiResponse, json_body};
use super::{parse_platform, platform_client};
use crate::AppState;
use crate::domain::{accounts, oauth_states};
use crate::services::error::LogErr;
use crate::services::platforms::oauth;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connect/{platform}", get(start_connect))
        .route("/connect/{platform}/callback", post(finish_connect))
}

#[derive(Serialize)]
struct AuthUrlResponse {
    url: String,
    state: String,
}

/// GET /connect/{platform} - Start OAuth, returns the URL to send the user to
async fn start_connect(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(platform): Path<String>,
) -> Result<ApiResponse<AuthUrlResponse>, ApiError> {
    let platform = parse_platform(&platform)?;
    let client = platform_client(&state, platform)?;

    let oauth_state = oauth::generate_state();
    let pkce = oauth::generate_pkce();

    // Without a stored state the callback cannot succeed, so fail here
    oauth_states::save_oauth_state(&state.db, &oauth_state, user_id, platform, &pkce.verifier)
        .await
        .log_500("Save OAuth state error")?;

    Ok(ApiResponse::ok(AuthUrlResponse {
        url: client.authorize_url(&oauth_state, &pkce.challenge),
        state: oauth_state,
    }))
}

#[derive(Deserialize)]
struct CallbackRequest {
    code: String,
    state: String,
}

/// POST /connect/{platform}/callback - Exchange the code and store the account
async fn finish_connect(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(platform): Path<String>,
    body: Result<Json<CallbackRequest>, JsonRejection>,
) -> Result<ApiResponse<AccountResponse>, ApiError> {
    let platform = parse_platform(&platform)?;
    let req = json_body(body)?;
    let client = platform_client(&state, platform)?;

    let code_verifier = oauth_states::take_oauth_state(&state.db, &req.state, user_id, platform)
        .await
        .log_500("Take OAuth state error")?
        .ok_or_else(|| ApiError::bad_request("invalid or expired state"))?;

    let grant = client
        .exchange_code(&req.code, &code_verifier)
        .await
        .log_status(
            "Token exchange error",
            StatusCode::BAD_GATEWAY,
            "platform rejected the authorization code",
        )?;

    let profile = client.fetch_profile(&grant.access_token).await.log_status(
        "Fetch profile error",
        StatusCode::BAD_GATEWAY,
        "could not load the platform profile",
    )?;

    let expires_at = grant.expires_at(Utc::now()).log_status(
        "Token expiry error",
        StatusCode::BAD_GATEWAY,
        "platform returned an invalid token",
    )?;

    let account = accounts::upsert_account(
        &state.db,
        user_id,
        platform,
        &profile.id,
        profile.display_name.as_deref(),
        &grant.access_token,
        grant.refresh_token.as_deref(),
        expires_at,
    )
    .await
    .log_500("Upsert account error")?;

    tracing::info!(user_id, platform = %platform, "platform account connected");
    Ok(ApiResponse::ok(account.into()).with_message("connected"))
}
