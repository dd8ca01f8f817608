//! Cookie building utilities for session management
//!
//! Centralizes cookie formatting so login, signup, refresh and logout agree on
//! names, paths and attributes.

use axum::http::HeaderValue;

use crate::config::CookieSettings;
use crate::routes::envelope::ApiError;
use crate::services::session::{ACCESS_TOKEN_EXPIRY_MINUTES, REFRESH_TOKEN_EXPIRY_DAYS};

pub const ACCESS_TOKEN_NAME: &str = "access_token";
pub const REFRESH_TOKEN_NAME: &str = "refresh_token";

const ACCESS_TOKEN_MAX_AGE_SECS: i64 = ACCESS_TOKEN_EXPIRY_MINUTES * 60;
const REFRESH_TOKEN_MAX_AGE_SECS: i64 = REFRESH_TOKEN_EXPIRY_DAYS * 24 * 60 * 60;
const COOKIE_PATH: &str = "/";

fn build(
    settings: &CookieSettings,
    name: &str,
    value: &str,
    max_age: i64,
) -> Result<HeaderValue, ApiError> {
    let secure = if settings.secure { " Secure;" } else { "" };
    let cookie = format!(
        "{}={}; HttpOnly;{} SameSite={}; Path={}; Max-Age={}",
        name,
        value,
        secure,
        settings.same_site.as_str(),
        COOKIE_PATH,
        max_age
    );
    cookie.parse().map_err(|_| {
        tracing::error!(cookie = name, "failed to build Set-Cookie header");
        ApiError::internal()
    })
}

/// Build an access token Set-Cookie header value
pub fn access_cookie(settings: &CookieSettings, token: &str) -> Result<HeaderValue, ApiError> {
    build(settings, ACCESS_TOKEN_NAME, token, ACCESS_TOKEN_MAX_AGE_SECS)
}

/// Build a refresh token Set-Cookie header value
pub fn refresh_cookie(settings: &CookieSettings, token: &str) -> Result<HeaderValue, ApiError> {
    build(settings, REFRESH_TOKEN_NAME, token, REFRESH_TOKEN_MAX_AGE_SECS)
}

/// Set-Cookie values that expire both session cookies
pub fn clear_cookies(settings: &CookieSettings) -> Result<[HeaderValue; 2], ApiError> {
    Ok([
        build(settings, ACCESS_TOKEN_NAME, "", 0)?,
        build(settings, REFRESH_TOKEN_NAME, "", 0)?,
    ])
}
