//! Post domain - models and DB queries for cross-posts
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Executor, Postgres, Type};
use std::str::FromStr;

use super::platform::Platform;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("unknown post status: {}", other)),
        }
    }
}

impl Type<Postgres> for PostStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for PostStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl Encode<'_, Postgres> for PostStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// One attempt to publish a video on one platform
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub video_id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub caption: Option<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub publish_error: Option<String>,
    pub attempts: i32,
    pub claimed_until: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Scheduled and its time has come. Mirrors the WHERE clause of `claim_due_posts`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }

    /// No other worker holds a live lease on this row.
    pub fn is_unclaimed(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_none_or(|until| until < now)
    }

    /// Failed and untouched for longer than `retention`. Mirrors `delete_stale_failed_posts`.
    pub fn is_stale_failure(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.status == PostStatus::Failed && self.updated_at < now - retention
    }
}

/// A claimed post joined with what dispatch needs from its video
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DuePost {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub caption: Option<String>,
    pub storage_location: String,
    pub content_type: String,
}

const POST_COLUMNS: &str = "id, video_id, user_id, platform, caption, status, scheduled_at, \
     external_id, publish_error, attempts, claimed_until, published_at, created_at, updated_at";

/// Insert a scheduled post
pub async fn insert_post<'e, E>(
    executor: E,
    video_id: i64,
    user_id: i64,
    platform: Platform,
    caption: Option<&str>,
    scheduled_at: DateTime<Utc>,
) -> Result<Post, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        INSERT INTO posts (video_id, user_id, platform, caption, status, scheduled_at)
        VALUES ($1, $2, $3, $4, 'scheduled', $5)
        RETURNING {}
        "#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(video_id)
        .bind(user_id)
        .bind(platform)
        .bind(caption)
        .bind(scheduled_at)
        .fetch_one(executor)
        .await
}

pub async fn get_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM posts WHERE id = $1 AND user_id = $2",
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(post_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

pub async fn count_posts<'e, E>(
    executor: E,
    user_id: i64,
    status: Option<PostStatus>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM posts WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)",
    )
    .bind(user_id)
    .bind(status)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// List a user's posts, newest first
pub async fn list_posts<'e, E>(
    executor: E,
    user_id: i64,
    status: Option<PostStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {}
           FROM posts
           WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
           ORDER BY created_at DESC, id DESC
           LIMIT $3 OFFSET $4"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
}

/// Edit a post that is still scheduled and not held by a worker.
/// `caption`: None leaves it alone, `Some(None)` clears it.
/// Returns None if the post is missing, already dispatched, or claimed.
pub async fn update_scheduled_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
    scheduled_at: Option<DateTime<Utc>>,
    caption: Option<Option<&str>>,
    now: DateTime<Utc>,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        UPDATE posts SET
            scheduled_at = COALESCE($3, scheduled_at),
            caption = CASE WHEN $4 THEN $5 ELSE caption END,
            updated_at = $6
        WHERE id = $1 AND user_id = $2
          AND status = 'scheduled'
          AND (claimed_until IS NULL OR claimed_until < $6)
        RETURNING {}
        "#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(post_id)
        .bind(user_id)
        .bind(scheduled_at)
        .bind(caption.is_some())
        .bind(caption.flatten())
        .bind(now)
        .fetch_optional(executor)
        .await
}

/// Cancel a post that is still scheduled and not held by a worker
pub async fn delete_scheduled_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM posts
        WHERE id = $1 AND user_id = $2
          AND status = 'scheduled'
          AND (claimed_until IS NULL OR claimed_until < $3)
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Claim up to `limit` due posts for dispatch by setting a lease.
/// SKIP LOCKED keeps concurrent schedulers from claiming the same rows.
pub async fn claim_due_posts<'e, E>(
    executor: E,
    now: DateTime<Utc>,
    limit: i64,
    lease: Duration,
) -> Result<Vec<DuePost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        WITH claimed AS (
            SELECT id
            FROM posts
            WHERE status = 'scheduled'
              AND scheduled_at <= $1
              AND (claimed_until IS NULL OR claimed_until < $1)
            ORDER BY scheduled_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        UPDATE posts p
        SET claimed_until = $3
        FROM claimed, videos v
        WHERE p.id = claimed.id AND v.id = p.video_id
        RETURNING p.id, p.user_id, p.platform, p.caption, v.storage_location, v.content_type
        "#,
    )
    .bind(now)
    .bind(limit)
    .bind(now + lease)
    .fetch_all(executor)
    .await
}

/// Claim one specific scheduled post (publish-now). Ignores `scheduled_at`.
pub async fn claim_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
    lease: Duration,
) -> Result<Option<DuePost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        UPDATE posts p
        SET claimed_until = $4
        FROM videos v
        WHERE p.id = $1 AND p.user_id = $2
          AND v.id = p.video_id
          AND p.status = 'scheduled'
          AND (p.claimed_until IS NULL OR p.claimed_until < $3)
        RETURNING p.id, p.user_id, p.platform, p.caption, v.storage_location, v.content_type
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .bind(now)
    .bind(now + lease)
    .fetch_optional(executor)
    .await
}

pub async fn mark_post_published<'e, E>(
    executor: E,
    post_id: i64,
    external_id: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts SET
            status = 'published',
            scheduled_at = NULL,
            external_id = $2,
            publish_error = NULL,
            attempts = attempts + 1,
            claimed_until = NULL,
            published_at = $3,
            updated_at = $3
        WHERE id = $1 AND status = 'scheduled'
        "#,
    )
    .bind(post_id)
    .bind(external_id)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn mark_post_failed<'e, E>(
    executor: E,
    post_id: i64,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts SET
            status = 'failed',
            scheduled_at = NULL,
            publish_error = $2,
            attempts = attempts + 1,
            claimed_until = NULL,
            updated_at = $3
        WHERE id = $1 AND status = 'scheduled'
        "#,
    )
    .bind(post_id)
    .bind(error)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Give up a dispatch claim without an outcome; the post is picked up again next tick
pub async fn release_post<'e, E>(executor: E, post_id: i64) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE posts SET claimed_until = NULL WHERE id = $1 AND status = 'scheduled'")
        .bind(post_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Bulk delete failed posts last touched before `cutoff`. Returns the number removed.
pub async fn delete_stale_failed_posts<'e, E>(
    executor: E,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM posts WHERE status = 'failed' AND updated_at < $1")
        .bind(cutoff)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
