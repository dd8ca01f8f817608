pub mod accounts;
pub mod auth;
pub mod connect;
pub mod envelope;
pub mod posts;
pub mod videos;

use axum::{
    Router,
    extract::{Path, Query, rejection::PathRejection, rejection::QueryRejection},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::domain::Platform;
use crate::services::platforms::PlatformClient;
use envelope::{ApiError, ApiResponse};

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(auth::routes())
        .merge(connect::routes())
        .merge(accounts::routes())
        .merge(videos::routes())
        .merge(posts::routes())
}

#[derive(Serialize)]
struct Health {
    ok: bool,
}

/// GET /health - Liveness
async fn health() -> ApiResponse<Health> {
    ApiResponse::ok(Health { ok: true })
}

/// `{platform}` path segment; unknown names are a 400, not a 404
pub fn parse_platform(raw: &str) -> Result<Platform, ApiError> {
    raw.parse()
        .map_err(|e: crate::domain::platform::UnknownPlatform| ApiError::bad_request(e.to_string()))
}

/// Client for a platform, or 400 when its credentials are not configured
pub fn platform_client(
    state: &AppState,
    platform: Platform,
) -> Result<Arc<dyn PlatformClient>, ApiError> {
    state
        .platforms
        .get(platform)
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// Numeric `{id}` path segment with an enveloped rejection
pub fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

/// Query string with an enveloped rejection
pub fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    /// (limit, offset) clamped to sane bounds
    pub fn bounds(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, limit: i64, offset: i64) -> Self {
        Self {
            items,
            total,
            has_more: (offset + limit) < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_are_clamped() {
        assert_eq!(PageQuery::default().bounds(), (DEFAULT_PAGE_SIZE, 0));
        let q = PageQuery {
            limit: Some(1000),
            offset: Some(-5),
        };
        assert_eq!(q.bounds(), (MAX_PAGE_SIZE, 0));
        let q = PageQuery {
            limit: Some(0),
            offset: Some(20),
        };
        assert_eq!(q.bounds(), (1, 20));
    }

    #[test]
    fn has_more_reflects_remaining_rows() {
        assert!(Page::new(vec![1, 2], 5, 2, 0).has_more);
        assert!(!Page::new(vec![5], 5, 2, 4).has_more);
        assert!(!Page::<i32>::new(vec![], 0, 50, 0).has_more);
    }

    #[test]
    fn platform_segment_is_case_insensitive() {
        assert_eq!(parse_platform("TikTok").unwrap(), Platform::Tiktok);
        let err = parse_platform("myspace").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "unknown platform: myspace");
    }
}
