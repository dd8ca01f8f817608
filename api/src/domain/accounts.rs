//! Social account domain - connected platform accounts and their OAuth tokens
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, Postgres};

use super::platform::Platform;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SocialAccount {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub platform_user_id: String,
    pub display_name: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub refresh_claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How far ahead of expiry tokens that cannot be refreshed once expired are renewed
pub const RENEWAL_LEAD_DAYS: i64 = 7;

impl SocialAccount {
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Mirrors the selection in `claim_accounts_due_for_refresh`.
    pub fn due_for_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.refresh_token.is_none() {
            return false;
        }
        if self.platform.renews_before_expiry() {
            !self.token_expired(now) && self.expires_at < now + Duration::days(RENEWAL_LEAD_DAYS)
        } else {
            self.token_expired(now)
        }
    }

    /// Expired with no way to refresh; the user has to connect again.
    /// Mirrors `count_accounts_needing_reconnect`.
    pub fn needs_reconnect(&self, now: DateTime<Utc>) -> bool {
        self.token_expired(now)
            && (self.refresh_token.is_none() || self.platform.renews_before_expiry())
    }
}

const ACCOUNT_COLUMNS: &str = "id, user_id, platform, platform_user_id, display_name, \
     access_token, refresh_token, expires_at, refresh_claimed_until, created_at, updated_at";

/// Insert or replace the account for (user, platform).
/// A missing refresh token keeps whatever was stored before.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_account<'e, E>(
    executor: E,
    user_id: i64,
    platform: Platform,
    platform_user_id: &str,
    display_name: Option<&str>,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<SocialAccount, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        INSERT INTO social_accounts
            (user_id, platform, platform_user_id, display_name, access_token, refresh_token, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, platform) DO UPDATE SET
            platform_user_id = $3,
            display_name = $4,
            access_token = $5,
            refresh_token = COALESCE($6, social_accounts.refresh_token),
            expires_at = $7,
            refresh_claimed_until = NULL,
            updated_at = NOW()
        RETURNING {}
        "#,
        ACCOUNT_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(platform)
        .bind(platform_user_id)
        .bind(display_name)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .fetch_one(executor)
        .await
}

pub async fn find_account<'e, E>(
    executor: E,
    user_id: i64,
    platform: Platform,
) -> Result<Option<SocialAccount>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM social_accounts WHERE user_id = $1 AND platform = $2",
        ACCOUNT_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(platform)
        .fetch_optional(executor)
        .await
}

pub async fn list_accounts<'e, E>(
    executor: E,
    user_id: i64,
) -> Result<Vec<SocialAccount>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM social_accounts WHERE user_id = $1 ORDER BY platform",
        ACCOUNT_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .fetch_all(executor)
        .await
}

/// Platforms the user has connected
pub async fn connected_platforms<'e, E>(
    executor: E,
    user_id: i64,
) -> Result<Vec<Platform>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(Platform,)> =
        sqlx::query_as("SELECT platform FROM social_accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(executor)
            .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn delete_account<'e, E>(
    executor: E,
    user_id: i64,
    platform: Platform,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM social_accounts WHERE user_id = $1 AND platform = $2")
        .bind(user_id)
        .bind(platform)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Claim accounts whose token is due for refresh: expired, or for platforms
/// that renew before expiry, inside the renewal window.
/// The lease keeps a second scheduler from refreshing the same account; a
/// failed refresh leaves it in place so the account is retried once it lapses.
pub async fn claim_accounts_due_for_refresh<'e, E>(
    executor: E,
    now: DateTime<Utc>,
    limit: i64,
    lease: Duration,
) -> Result<Vec<SocialAccount>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        WITH claimed AS (
            SELECT id
            FROM social_accounts
            WHERE refresh_token IS NOT NULL
              AND (refresh_claimed_until IS NULL OR refresh_claimed_until < $1)
              AND CASE
                    WHEN platform IN ('facebook', 'instagram')
                        THEN expires_at >= $1 AND expires_at < $4
                    ELSE expires_at < $1
                  END
            ORDER BY expires_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        UPDATE social_accounts a
        SET refresh_claimed_until = $3
        FROM claimed
        WHERE a.id = claimed.id
        RETURNING a.*
        "#,
    )
    .bind(now)
    .bind(limit)
    .bind(now + lease)
    .bind(now + Duration::days(RENEWAL_LEAD_DAYS))
    .fetch_all(executor)
    .await
}

/// Take the refresh lease on one expired account (inline refresh before a
/// publish). None if it is no longer expired or someone else holds the lease.
pub async fn claim_account_refresh<'e, E>(
    executor: E,
    account_id: i64,
    now: DateTime<Utc>,
    lease: Duration,
) -> Result<Option<SocialAccount>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        UPDATE social_accounts
        SET refresh_claimed_until = $3
        WHERE id = $1
          AND expires_at < $2
          AND (refresh_claimed_until IS NULL OR refresh_claimed_until < $2)
        RETURNING {}
        "#,
        ACCOUNT_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(account_id)
        .bind(now)
        .bind(now + lease)
        .fetch_optional(executor)
        .await
}

/// Expired accounts that no refresh can rescue
pub async fn count_accounts_needing_reconnect<'e, E>(
    executor: E,
    now: DateTime<Utc>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM social_accounts
        WHERE expires_at < $1
          AND (refresh_token IS NULL OR platform IN ('facebook', 'instagram'))
        "#,
    )
    .bind(now)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Store a fresh token pair in one statement and release the refresh lease
pub async fn update_tokens<'e, E>(
    executor: E,
    account_id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE social_accounts SET
            access_token = $2,
            refresh_token = COALESCE($3, refresh_token),
            expires_at = $4,
            refresh_claimed_until = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .execute(executor)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_strictly_before_now() {
        let now = Utc::now();
        let mut account = SocialAccount {
            id: 1,
            user_id: 1,
            platform: Platform::Youtube,
            platform_user_id: "UC123".into(),
            display_name: None,
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_at: now - Duration::seconds(1),
            refresh_claimed_until: None,
            created_at: now,
            updated_at: now,
        };
        assert!(account.token_expired(now));
        account.expires_at = now;
        assert!(!account.token_expired(now));
        account.expires_at = now + Duration::hours(1);
        assert!(!account.token_expired(now));
    }

    fn account(
        platform: Platform,
        expires_at: DateTime<Utc>,
        refresh: Option<&str>,
    ) -> SocialAccount {
        SocialAccount {
            id: 1,
            user_id: 1,
            platform,
            platform_user_id: "u".into(),
            display_name: None,
            access_token: "a".into(),
            refresh_token: refresh.map(str::to_string),
            expires_at,
            refresh_claimed_until: None,
            created_at: expires_at,
            updated_at: expires_at,
        }
    }

    #[test]
    fn oauth_refresh_platforms_refresh_after_expiry() {
        let now = Utc::now();
        let expired = account(Platform::Tiktok, now - Duration::minutes(1), Some("r"));
        assert!(expired.due_for_refresh(now));
        assert!(!expired.needs_reconnect(now));

        let valid = account(Platform::Youtube, now + Duration::days(1), Some("r"));
        assert!(!valid.due_for_refresh(now));

        let stranded = account(Platform::Tiktok, now - Duration::minutes(1), None);
        assert!(!stranded.due_for_refresh(now));
        assert!(stranded.needs_reconnect(now));
    }

    #[test]
    fn meta_tokens_are_renewed_while_still_valid() {
        let now = Utc::now();
        let expiring = account(Platform::Facebook, now + Duration::days(3), Some("t"));
        assert!(expiring.due_for_refresh(now));

        let fresh = account(Platform::Instagram, now + Duration::days(50), Some("t"));
        assert!(!fresh.due_for_refresh(now));

        let expired = account(Platform::Instagram, now - Duration::minutes(1), Some("t"));
        assert!(!expired.due_for_refresh(now));
        assert!(expired.needs_reconnect(now));
    }

    mod postgres {
        use super::*;
        use crate::services::db::{test_pool, test_user};

        #[tokio::test]
        async fn refresh_selection_and_leases_against_postgres() {
            let Some(pool) = test_pool().await else {
                return;
            };
            let user_id = test_user(&pool).await;
            let now = Utc::now();
            let lease = Duration::minutes(5);
            let expired = now - Duration::hours(1);

            let mut ids = Vec::new();
            for (platform, expires_at, refresh) in [
                (Platform::Tiktok, expired, Some("rt")),
                (Platform::Youtube, expired, None),
                (Platform::Facebook, now + Duration::days(3), Some("fb-ll")),
                (Platform::Instagram, expired, Some("ig-ll")),
            ] {
                let account = upsert_account(
                    &pool, user_id, platform, "remote-id", None, "at", refresh, expires_at,
                )
                .await
                .unwrap();
                ids.push(account.id);
            }
            let [tiktok, youtube, facebook, instagram] = ids[..] else {
                unreachable!()
            };

            let claimed: Vec<i64> = claim_accounts_due_for_refresh(&pool, now, 1000, lease)
                .await
                .unwrap()
                .iter()
                .map(|a| a.id)
                .collect();
            assert!(claimed.contains(&tiktok));
            assert!(claimed.contains(&facebook));
            assert!(!claimed.contains(&youtube));
            assert!(!claimed.contains(&instagram));

            let again: Vec<i64> = claim_accounts_due_for_refresh(&pool, now, 1000, lease)
                .await
                .unwrap()
                .iter()
                .map(|a| a.id)
                .collect();
            assert!(!again.contains(&tiktok));
            assert!(!again.contains(&facebook));

            // leased by the run above, or not expired
            assert!(claim_account_refresh(&pool, tiktok, now, lease).await.unwrap().is_none());
            assert!(claim_account_refresh(&pool, facebook, now, lease).await.unwrap().is_none());
            let inline = claim_account_refresh(&pool, youtube, now, lease)
                .await
                .unwrap()
                .unwrap();
            assert!(inline.refresh_claimed_until.is_some_and(|until| until > now));

            assert!(count_accounts_needing_reconnect(&pool, now).await.unwrap() >= 2);

            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(user_id)
                .execute(&pool)
                .await
                .unwrap();
        }
    }
}
