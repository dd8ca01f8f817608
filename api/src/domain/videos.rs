//! Video domain - DB queries for uploaded videos
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Executor, Postgres, Type};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Pending,
    Uploaded,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Failed => "failed",
        }
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VideoStatus::Pending),
            "uploaded" => Ok(VideoStatus::Uploaded),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(format!("unknown video status: {}", other)),
        }
    }
}

impl Type<Postgres> for VideoStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for VideoStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl Encode<'_, Postgres> for VideoStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Video {
    pub id: i64,
    pub owner_id: i64,
    pub storage_location: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create the row for an upload that is about to start
pub async fn insert_pending_video<'e, E>(
    executor: E,
    owner_id: i64,
    storage_location: &str,
    content_type: &str,
) -> Result<Video, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        INSERT INTO videos (owner_id, storage_location, content_type, status)
        VALUES ($1, $2, $3, 'pending')
        RETURNING *
        "#,
    )
    .bind(owner_id)
    .bind(storage_location)
    .bind(content_type)
    .fetch_one(executor)
    .await
}

/// Record the outcome of an upload
pub async fn complete_upload<'e, E>(
    executor: E,
    video_id: i64,
    status: VideoStatus,
    size_bytes: i64,
) -> Result<Option<Video>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        UPDATE videos SET status = $2, size_bytes = $3, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(video_id)
    .bind(status)
    .bind(size_bytes)
    .fetch_optional(executor)
    .await
}

pub async fn get_video<'e, E>(
    executor: E,
    video_id: i64,
    owner_id: i64,
) -> Result<Option<Video>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM videos WHERE id = $1 AND owner_id = $2")
        .bind(video_id)
        .bind(owner_id)
        .fetch_optional(executor)
        .await
}

/// Video rows with total count from window function
#[derive(Debug, sqlx::FromRow)]
struct VideoWithTotal {
    #[sqlx(flatten)]
    video: Video,
    total_count: i64,
}

/// List a user's videos, newest first. Returns (page, total).
pub async fn list_videos<'e, E>(
    executor: E,
    owner_id: i64,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Video>, i64), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<VideoWithTotal> = sqlx::query_as(
        r#"
        SELECT *, COUNT(*) OVER() AS total_count
        FROM videos
        WHERE owner_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(owner_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    let total = rows.first().map(|r| r.total_count).unwrap_or(0);
    Ok((rows.into_iter().map(|r| r.video).collect(), total))
}
