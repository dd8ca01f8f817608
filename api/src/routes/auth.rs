//! Authentication and session management endpoints

use axum::{
    Json, Router,
    extract::{FromRequestParts, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, header::SET_COOKIE, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use super::envelope::{ApiError, ApiResponse, json_body};
use crate::AppState;
use crate::domain::users::{self, User};
use crate::services::error::LogErr;
use crate::services::{cookies, password, session};

const MAX_EMAIL_LEN: usize = 254;
const MAX_PASSWORD_LEN: usize = 128;

pub fn routes() -> Router<Arc<AppState>> {
    // Credential endpoints: burst of 10, then one every 6 seconds per IP
    let credential_limit = GovernorConfigBuilder::default()
        .per_second(6)
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .map(|config| GovernorLayer {
            config: config.into(),
        });

    let credentials = Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login));
    let credentials = match credential_limit {
        Some(layer) => credentials.layer(layer),
        None => {
            tracing::error!("invalid auth rate limit config, serving auth routes unlimited");
            credentials
        }
    };

    Router::new()
        .merge(credentials)
        .route("/auth/refresh", post(refresh_session))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(get_me))
}

// ============================================================================
// Auth Extractor - validates the JWT and extracts user_id
// ============================================================================

/// Authenticated caller. Reads the `access_token` cookie, or an
/// `Authorization: Bearer` header for non-browser clients.
pub struct AuthUser(pub i64);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        let token = match bearer {
            Some(token) => token,
            None => {
                let jar = CookieJar::from_headers(&parts.headers);
                jar.get(cookies::ACCESS_TOKEN_NAME)
                    .map(|c| c.value().to_string())
                    .ok_or_else(ApiError::unauthorized)?
            }
        };

        let user_id = session::validate_access_token(&token, &state.jwt_secret).map_err(|e| {
            tracing::debug!(error = %e, "access token rejected");
            ApiError::unauthorized()
        })?;

        Ok(AuthUser(user_id))
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[derive(Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            created_at: u.created_at,
        }
    }
}

#[derive(Serialize)]
struct SessionResponse {
    user: UserResponse,
    /// Same JWT as the cookie, for clients that send `Authorization: Bearer`
    access_token: String,
}

fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.contains(char::is_whitespace)
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });
    if valid {
        Ok(email)
    } else {
        Err(ApiError::unprocessable("invalid email address"))
    }
}

fn check_password(password: &str) -> Result<(), ApiError> {
    let len = password.chars().count();
    if len < password::MIN_PASSWORD_LEN {
        return Err(ApiError::unprocessable(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LEN
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ApiError::unprocessable(format!(
            "password must be at most {} characters",
            MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Issue the access + refresh token pair for a user.
/// Returns the access token and the two Set-Cookie values.
async fn issue_session(
    state: &AppState,
    user_id: i64,
) -> Result<(String, [HeaderValue; 2]), ApiError> {
    let access_token = session::create_access_token(user_id, &state.jwt_secret)
        .log_500("Create access token error")?;
    let refresh_token = session::create_refresh_token(user_id, &state.db)
        .await
        .log_500("Create refresh token error")?;

    let cookies = [
        cookies::access_cookie(&state.cookies, &access_token)?,
        cookies::refresh_cookie(&state.cookies, &refresh_token)?,
    ];
    Ok((access_token, cookies))
}

fn with_cookies<const N: usize>(body: impl IntoResponse, cookies: [HeaderValue; N]) -> Response {
    let mut response = body.into_response();
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// POST /auth/signup - Create an account and start a session
async fn signup(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(body)?;
    let email = normalize_email(&req.email)?;
    check_password(&req.password)?;

    let hash = password::hash_password_blocking(req.password)
        .await
        .log_500("Password hash error")?;

    let user = users::insert_user(&state.db, &email, &hash)
        .await
        .log_500("Insert user error")?
        .ok_or_else(|| ApiError::conflict("email already registered"))?;

    tracing::info!(user_id = user.id, "user signed up");
    let (access_token, cookies) = issue_session(&state, user.id).await?;
    let body = ApiResponse::created(SessionResponse {
        user: user.into(),
        access_token,
    });
    Ok(with_cookies(body, cookies))
}

/// POST /auth/login - Verify credentials and start a session
async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(body)?;
    let email = req.email.trim().to_lowercase();
    let invalid = || ApiError::new(StatusCode::UNAUTHORIZED, "invalid email or password");

    let user = users::get_user_by_email(&state.db, &email)
        .await
        .log_500("Get user by email error")?
        .ok_or_else(invalid)?;

    let matches = password::verify_password_blocking(req.password, user.password_hash.clone())
        .await
        .log_500("Password verify error")?;
    if !matches {
        return Err(invalid());
    }

    let (access_token, cookies) = issue_session(&state, user.id).await?;
    let body = ApiResponse::ok(SessionResponse {
        user: user.into(),
        access_token,
    });
    Ok(with_cookies(body, cookies))
}

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Serialize)]
struct RefreshResponse {
    access_token: String,
}

/// POST /auth/refresh - Rotate the refresh token cookie and issue a new access token
async fn refresh_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let old_refresh_token = jar
        .get(cookies::REFRESH_TOKEN_NAME)
        .map(|c| c.value().to_string())
        .ok_or_else(ApiError::unauthorized)?;

    // Only one of two concurrent requests with the same token succeeds.
    // Invalid or expired tokens are routine for lapsed sessions, so no logging.
    let (user_id, new_refresh_token) = session::rotate_refresh_token(&old_refresh_token, &state.db)
        .await
        .map_err(|e| match e {
            session::SessionError::Database(e) => {
                tracing::error!(error = %e, "Rotate refresh token error");
                ApiError::internal()
            }
            _ => ApiError::unauthorized(),
        })?;

    let access_token = session::create_access_token(user_id, &state.jwt_secret)
        .log_500("Create access token error")?;

    let cookies = [
        cookies::access_cookie(&state.cookies, &access_token)?,
        cookies::refresh_cookie(&state.cookies, &new_refresh_token)?,
    ];
    Ok(with_cookies(ApiResponse::ok(RefreshResponse { access_token }), cookies))
}

/// POST /auth/logout - Revoke the refresh token and clear cookies
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Response, ApiError> {
    if let Some(refresh_token) = jar.get(cookies::REFRESH_TOKEN_NAME) {
        // Still logged out client-side if this fails
        if let Err(e) = session::revoke_refresh_token(refresh_token.value(), &state.db).await {
            tracing::warn!(error = %e, "failed to revoke refresh token during logout");
        }
    }

    let cookies = cookies::clear_cookies(&state.cookies)?;
    Ok(with_cookies(
        ApiResponse::ok(()).with_message("logged out"),
        cookies,
    ))
}

/// GET /auth/me - Current user
async fn get_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    // A valid JWT for a deleted user is still unauthorized
    let user = users::get_user_by_id(&state.db, user_id)
        .await
        .log_500("Get user by ID error")?
        .ok_or_else(ApiError::unauthorized)?;

    Ok(ApiResponse::ok(user.into()))
}
