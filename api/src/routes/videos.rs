//! Video upload and retrieval (/videos, /media)

use axum::{
    Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Path, Query, State,
        rejection::{BytesRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::envelope::{ApiError, ApiResponse};
use super::{Page, PageQuery, path_id, query};
use crate::AppState;
use crate::constants::{MAX_VIDEO_UPLOAD_SIZE, SIGNED_URL_EXPIRY_SECS};
use crate::domain::videos::{self, Video, VideoStatus};
use crate::services::error::LogErr;
use crate::storage::{self, StorageError, VideoUrls};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/videos", get(list_videos).post(upload_video))
        .route("/videos/{id}", get(get_video))
        .route("/videos/{id}/url", get(get_video_url))
        .route("/media/{*path}", get(serve_media))
        .layer(DefaultBodyLimit::max(MAX_VIDEO_UPLOAD_SIZE))
}

/// Video API response DTO
#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub id: i64,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Video> for VideoResponse {
    fn from(v: Video) -> Self {
        Self {
            id: v.id,
            content_type: v.content_type,
            size_bytes: v.size_bytes,
            status: v.status,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

/// Base media type, without parameters, if it is `video/*`
fn video_content_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let base = raw.split(';').next()?.trim().to_ascii_lowercase();
    base.starts_with("video/").then_some(base)
}

/// POST /videos - Upload a raw video body (`Content-Type: video/*`)
async fn upload_video(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<ApiResponse<VideoResponse>, ApiError> {
    let content_type = video_content_type(&headers).ok_or_else(|| {
        ApiError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "content type must be video/*")
    })?;
    let body = body.map_err(|e| ApiError::new(e.status(), e.body_text()))?;
    if body.is_empty() {
        return Err(ApiError::unprocessable("empty upload"));
    }
    // Only uploads that would be stored count against the limit
    if !state.upload_limiter.check(user_id) {
        return Err(ApiError::too_many_requests());
    }

    let size_bytes = body.len() as i64;
    let location = storage::video_location(user_id, Utc::now(), &content_type);

    let video = videos::insert_pending_video(&state.db, user_id, &location, &content_type)
        .await
        .log_500("Insert video error")?;

    if let Err(e) = state.storage.put(&location, body).await {
        tracing::error!(video_id = video.id, error = %e, "video upload failed");
        videos::complete_upload(&state.db, video.id, VideoStatus::Failed, 0)
            .await
            .log_500("Mark video failed error")?;
        return Err(ApiError::internal());
    }

    let video = videos::complete_upload(&state.db, video.id, VideoStatus::Uploaded, size_bytes)
        .await
        .log_500("Complete upload error")?
        .ok_or_else(ApiError::internal)?;

    tracing::info!(user_id, video_id = video.id, size_bytes, "video uploaded");
    Ok(ApiResponse::created(video.into()))
}

/// GET /videos - List own videos, newest first
async fn list_videos(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    page: Result<Query<PageQuery>, QueryRejection>,
) -> Result<ApiResponse<Page<VideoResponse>>, ApiError> {
    let (limit, offset) = query(page)?.bounds();

    let (rows, total) = videos::list_videos(&state.db, user_id, limit, offset)
        .await
        .log_500("List videos error")?;

    let items = rows.into_iter().map(VideoResponse::from).collect();
    Ok(ApiResponse::ok(Page::new(items, total, limit, offset)))
}

async fn find_video(state: &AppState, video_id: i64, user_id: i64) -> Result<Video, ApiError> {
    videos::get_video(&state.db, video_id, user_id)
        .await
        .log_500("Get video error")?
        .ok_or_else(|| ApiError::not_found("video not found"))
}

/// GET /videos/{id}
async fn get_video(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<ApiResponse<VideoResponse>, ApiError> {
    let video = find_video(&state, path_id(id)?, user_id).await?;
    Ok(ApiResponse::ok(video.into()))
}

#[derive(Serialize)]
struct VideoUrlResponse {
    url: String,
    content_type: String,
    /// Seconds until a signed URL stops working; absent for local media
    expires_in_secs: Option<u32>,
}

/// GET /videos/{id}/url - Playback URL
async fn get_video_url(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<ApiResponse<VideoUrlResponse>, ApiError> {
    let video = find_video(&state, path_id(id)?, user_id).await?;
    if video.status != VideoStatus::Uploaded {
        return Err(ApiError::unprocessable("video is not uploaded"));
    }

    let url = state
        .storage
        .read_url(&video.storage_location)
        .await
        .log_500("Video URL error")?;

    Ok(ApiResponse::ok(VideoUrlResponse {
        url,
        content_type: video.content_type,
        expires_in_secs: (!state.storage.is_local()).then_some(SIGNED_URL_EXPIRY_SECS),
    }))
}

/// GET /media/{*path} - Serve locally stored videos. Unauthenticated so
/// platforms can pull them; locations carry a random suffix.
async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if path.contains('\0') {
        return Err(ApiError::bad_request("invalid path"));
    }

    let bytes = match state.storage.read_local(&path).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) | Err(StorageError::NotLocal) => return Err(ApiError::not_found("not found")),
        Err(StorageError::InvalidPath(_)) => return Err(ApiError::bad_request("invalid path")),
        Err(e) => {
            tracing::error!(error = %e, "Read media error");
            return Err(ApiError::internal());
        }
    };

    // Objects are immutable once written
    Ok((
        [
            (header::CONTENT_TYPE, storage::content_type_for(&path)),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        bytes,
    ))
}
