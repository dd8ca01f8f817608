//! Cross-post routes (/posts)

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::auth::AuthUser;
use super::envelope::{ApiError, ApiResponse, json_body};
use super::{Page, PageQuery, parse_platform, path_id, query};
use crate::AppState;
use crate::constants::MAX_CAPTION_LEN;
use crate::domain::Platform;
use crate::domain::accounts;
use crate::domain::posts::{self, Post, PostStatus};
use crate::domain::videos::{self, VideoStatus};
use crate::jobs::dispatch::dispatch_post;
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/posts", get(list_posts).post(create_posts))
        .route(
            "/posts/{id}",
            get(get_post).patch(update_post).delete(delete_post),
        )
        .route("/posts/{id}/publish", post(publish_now))
}

/// Post API response DTO
#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: i64,
    pub video_id: i64,
    pub platform: Platform,
    pub caption: Option<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub publish_error: Option<String>,
    pub attempts: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Post> for PostResponse {
    fn from(p: Post) -> Self {
        Self {
            id: p.id,
            video_id: p.video_id,
            platform: p.platform,
            caption: p.caption,
            status: p.status,
            scheduled_at: p.scheduled_at,
            external_id: p.external_id,
            publish_error: p.publish_error,
            attempts: p.attempts,
            published_at: p.published_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostsRequest {
    pub video_id: i64,
    pub platforms: Vec<String>,
    pub caption: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Blank captions are stored as no caption
fn normalize_caption(caption: Option<String>) -> Result<Option<String>, ApiError> {
    let Some(caption) = caption.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if caption.chars().count() > MAX_CAPTION_LEN {
        return Err(ApiError::unprocessable(format!(
            "caption must be at most {} characters",
            MAX_CAPTION_LEN
        )));
    }
    Ok(Some(caption))
}

fn check_schedule(scheduled_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), ApiError> {
    match scheduled_at {
        Some(at) if at < now => Err(ApiError::unprocessable("scheduled_at is in the past")),
        _ => Ok(()),
    }
}

/// Parse and dedupe requested platforms, keeping request order
fn requested_platforms(raw: &[String]) -> Result<Vec<Platform>, ApiError> {
    if raw.is_empty() {
        return Err(ApiError::unprocessable("at least one platform is required"));
    }
    let mut seen = HashSet::new();
    let mut platforms = Vec::with_capacity(raw.len());
    for name in raw {
        let platform =
            parse_platform(name).map_err(|e| ApiError::unprocessable(e.message))?;
        if seen.insert(platform) {
            platforms.push(platform);
        }
    }
    Ok(platforms)
}

/// POST /posts - Cross-post a video, scheduled or right away
async fn create_posts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<CreatePostsRequest>, JsonRejection>,
) -> Result<ApiResponse<Vec<PostResponse>>, ApiError> {
    let req = json_body(payload)?;
    let now = Utc::now();

    let platforms = requested_platforms(&req.platforms)?;
    let caption = normalize_caption(req.caption)?;
    check_schedule(req.scheduled_at, now)?;

    let video = videos::get_video(&state.db, req.video_id, user_id)
        .await
        .log_500("Get video error")?
        .ok_or_else(|| ApiError::unprocessable("video not found"))?;
    if video.status != VideoStatus::Uploaded {
        return Err(ApiError::unprocessable("video is not uploaded"));
    }

    let connected = accounts::connected_platforms(&state.db, user_id)
        .await
        .log_500("Connected platforms error")?;
    if let Some(missing) = platforms.iter().find(|p| !connected.contains(p)) {
        return Err(ApiError::unprocessable(format!("{} is not connected", missing)));
    }

    let scheduled_at = req.scheduled_at.unwrap_or(now);
    let mut tx = state.db.begin().await.log_500("Begin transaction error")?;
    let mut created = Vec::with_capacity(platforms.len());
    for platform in platforms {
        let post = posts::insert_post(
            &mut *tx,
            video.id,
            user_id,
            platform,
            caption.as_deref(),
            scheduled_at,
        )
        .await
        .log_500("Insert post error")?;
        created.push(post);
    }
    tx.commit().await.log_500("Commit posts error")?;

    tracing::info!(
        user_id,
        video_id = video.id,
        posts = created.len(),
        scheduled = req.scheduled_at.is_some(),
        "posts created"
    );

    if req.scheduled_at.is_none() {
        // Posts the scheduler grabbed first are returned as they stand
        let mut dispatched = Vec::with_capacity(created.len());
        for post in created {
            claim_and_dispatch(&state, post.id, user_id).await?;
            dispatched.push(find_post(&state, post.id, user_id).await?);
        }
        created = dispatched;
    }

    let items = created.into_iter().map(PostResponse::from).collect();
    Ok(ApiResponse::created(items))
}

/// Claim and publish one post inline. False when the post is not claimable:
/// missing, no longer scheduled, or already held by the scheduler.
async fn claim_and_dispatch(
    state: &AppState,
    post_id: i64,
    user_id: i64,
) -> Result<bool, ApiError> {
    let now = Utc::now();
    let claimed = state
        .jobs
        .store
        .claim_post(post_id, user_id, now, state.jobs.settings.claim_lease)
        .await
        .log_500("Claim post error")?;

    let Some(due) = claimed else {
        return Ok(false);
    };
    dispatch_post(&state.jobs, &due, now)
        .await
        .log_500("Record dispatch error")?;
    Ok(true)
}

async fn find_post(state: &AppState, post_id: i64, user_id: i64) -> Result<Post, ApiError> {
    posts::get_post(&state.db, post_id, user_id)
        .await
        .log_500("Get post error")?
        .ok_or_else(|| ApiError::not_found("post not found"))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPostsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /posts - List own posts, optionally by status
async fn list_posts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    params: Result<Query<ListPostsQuery>, QueryRejection>,
) -> Result<ApiResponse<Page<PostResponse>>, ApiError> {
    let params = query(params)?;
    let status = params
        .status
        .as_deref()
        .map(str::parse::<PostStatus>)
        .transpose()
        .map_err(ApiError::unprocessable)?;
    let (limit, offset) = PageQuery {
        limit: params.limit,
        offset: params.offset,
    }
    .bounds();

    let total = posts::count_posts(&state.db, user_id, status)
        .await
        .log_500("Count posts error")?;
    let rows = posts::list_posts(&state.db, user_id, status, limit, offset)
        .await
        .log_500("List posts error")?;

    let items = rows.into_iter().map(PostResponse::from).collect();
    Ok(ApiResponse::ok(Page::new(items, total, limit, offset)))
}

/// GET /posts/{id}
async fn get_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<ApiResponse<PostResponse>, ApiError> {
    let post = find_post(&state, path_id(id)?, user_id).await?;
    Ok(ApiResponse::ok(post.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Absent keeps the caption; blank clears it
    pub caption: Option<String>,
}

/// `None` leaves the stored caption alone, `Some(None)` clears it
fn caption_update(caption: Option<String>) -> Result<Option<Option<String>>, ApiError> {
    match caption {
        None => Ok(None),
        Some(caption) => normalize_caption(Some(caption)).map(Some),
    }
}

/// PATCH /posts/{id} - Reschedule or re-caption a still-scheduled post
async fn update_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdatePostRequest>, JsonRejection>,
) -> Result<ApiResponse<PostResponse>, ApiError> {
    let post_id = path_id(id)?;
    let req = json_body(payload)?;
    let now = Utc::now();

    if req.scheduled_at.is_none() && req.caption.is_none() {
        return Err(ApiError::unprocessable("nothing to update"));
    }
    check_schedule(req.scheduled_at, now)?;
    let caption = caption_update(req.caption)?;

    let updated = posts::update_scheduled_post(
        &state.db,
        post_id,
        user_id,
        req.scheduled_at,
        caption.as_ref().map(Option::as_deref),
        now,
    )
    .await
    .log_500("Update post error")?;

    match updated {
        Some(post) => Ok(ApiResponse::ok(post.into())),
        None => {
            find_post(&state, post_id, user_id).await?;
            Err(ApiError::conflict("post is no longer scheduled"))
        }
    }
}

/// DELETE /posts/{id} - Cancel a still-scheduled post
async fn delete_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let post_id = path_id(id)?;

    let deleted = posts::delete_scheduled_post(&state.db, post_id, user_id, Utc::now())
        .await
        .log_500("Delete post error")?;

    if !deleted {
        find_post(&state, post_id, user_id).await?;
        return Err(ApiError::conflict("post is no longer scheduled"));
    }

    tracing::info!(user_id, post_id, "post cancelled");
    Ok(ApiResponse::ok(()).with_message("cancelled"))
}

/// POST /posts/{id}/publish - Dispatch one scheduled post now
async fn publish_now(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<ApiResponse<PostResponse>, ApiError> {
    let post_id = path_id(id)?;

    if !claim_and_dispatch(&state, post_id, user_id).await? {
        find_post(&state, post_id, user_id).await?;
        return Err(ApiError::conflict("post is not scheduled or is already being published"));
    }

    let post = find_post(&state, post_id, user_id).await?;
    Ok(ApiResponse::ok(post.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::Duration;

    #[test]
    fn platforms_are_parsed_and_deduped() {
        let raw = vec!["tiktok".to_string(), "YouTube".to_string(), "TIKTOK".to_string()];
        assert_eq!(
            requested_platforms(&raw).unwrap(),
            vec![Platform::Tiktok, Platform::Youtube]
        );

        let err = requested_platforms(&[]).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err = requested_platforms(&["vine".to_string()]).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.message, "unknown platform: vine");
    }

    #[test]
    fn caption_is_trimmed_and_bounded() {
        assert_eq!(normalize_caption(None).unwrap(), None);
        assert_eq!(normalize_caption(Some("   ".into())).unwrap(), None);
        assert_eq!(
            normalize_caption(Some(" hello ".into())).unwrap().as_deref(),
            Some("hello")
        );

        let long = "ü".repeat(MAX_CAPTION_LEN);
        assert!(normalize_caption(Some(long.clone())).is_ok());
        let err = normalize_caption(Some(format!("{}x", long))).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn blank_caption_clears_and_absent_keeps() {
        assert_eq!(caption_update(None).unwrap(), None);
        assert_eq!(caption_update(Some("  ".into())).unwrap(), Some(None));
        assert_eq!(
            caption_update(Some(" new ".into())).unwrap(),
            Some(Some("new".to_string()))
        );
        let too_long = "x".repeat(MAX_CAPTION_LEN + 1);
        assert!(caption_update(Some(too_long)).is_err());
    }

    #[test]
    fn past_schedule_is_rejected() {
        let now = Utc::now();
        assert!(check_schedule(None, now).is_ok());
        assert!(check_schedule(Some(now + Duration::minutes(5)), now).is_ok());
        let err = check_schedule(Some(now - Duration::minutes(5)), now).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
