//! Pending OAuth authorizations (state + PKCE verifier)

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use super::platform::Platform;

/// How long a started OAuth flow stays redeemable
pub const OAUTH_STATE_TTL_MINUTES: i64 = 10;

pub async fn save_oauth_state<'e, E>(
    executor: E,
    state: &str,
    user_id: i64,
    platform: Platform,
    code_verifier: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO oauth_states (state, user_id, platform, code_verifier)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(state)
    .bind(user_id)
    .bind(platform)
    .bind(code_verifier)
    .execute(executor)
    .await?;
    Ok(())
}

/// Consume a state for this user and platform, returning its code verifier.
pub async fn take_oauth_state<'e, E>(
    executor: E,
    state: &str,
    user_id: i64,
    platform: Platform,
) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    // Atomic DELETE + RETURNING prevents two callbacks redeeming the same state
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        DELETE FROM oauth_states
        WHERE state = $1 AND user_id = $2 AND platform = $3
          AND created_at > NOW() - make_interval(mins => $4::int)
        RETURNING code_verifier
        "#,
    )
    .bind(state)
    .bind(user_id)
    .bind(platform)
    .bind(OAUTH_STATE_TTL_MINUTES as i32)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|r| r.0))
}

/// Remove flows that were never completed
pub async fn delete_stale_oauth_states<'e, E>(
    executor: E,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "DELETE FROM oauth_states WHERE created_at < $1 - make_interval(mins => $2::int)",
    )
    .bind(now)
    .bind(OAUTH_STATE_TTL_MINUTES as i32)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
