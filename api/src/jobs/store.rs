//! Persistence seam for the background jobs.
//!
//! Jobs talk to [`JobStore`] rather than a pool so orchestration can be tested
//! against an in-memory store. [`PgJobStore`] forwards to the domain queries.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::domain::accounts::{self, SocialAccount};
use crate::domain::posts::{self, DuePost};
use crate::domain::{Platform, oauth_states};
use crate::services::auth::RefreshedTokens;
use crate::services::session;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn claim_due_posts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<DuePost>, sqlx::Error>;

    async fn claim_post(
        &self,
        post_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<DuePost>, sqlx::Error>;

    async fn find_account(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> Result<Option<SocialAccount>, sqlx::Error>;

    async fn mark_post_published(
        &self,
        post_id: i64,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    async fn mark_post_failed(
        &self,
        post_id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    /// Release a claimed post without recording an outcome
    async fn release_post(&self, post_id: i64) -> Result<(), sqlx::Error>;

    async fn claim_accounts_due_for_refresh(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<SocialAccount>, sqlx::Error>;

    /// Refresh lease on one expired account, for an inline refresh
    async fn claim_account_refresh(
        &self,
        account_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<SocialAccount>, sqlx::Error>;

    async fn count_accounts_needing_reconnect(
        &self,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error>;

    async fn store_refreshed_tokens(
        &self,
        account_id: i64,
        tokens: &RefreshedTokens,
    ) -> Result<(), sqlx::Error>;

    /// Delete failed posts last updated before `cutoff`, returning the count
    async fn delete_stale_failed_posts(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error>;

    /// Remove expired refresh tokens and abandoned OAuth states.
    /// Returns (refresh tokens, oauth states) deleted.
    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<(u64, u64), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_due_posts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<DuePost>, sqlx::Error> {
        posts::claim_due_posts(&self.pool, now, limit, lease).await
    }

    async fn claim_post(
        &self,
        post_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<DuePost>, sqlx::Error> {
        posts::claim_post(&self.pool, post_id, user_id, now, lease).await
    }

    async fn find_account(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> Result<Option<SocialAccount>, sqlx::Error> {
        accounts::find_account(&self.pool, user_id, platform).await
    }

    async fn mark_post_published(
        &self,
        post_id: i64,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        posts::mark_post_published(&self.pool, post_id, external_id, now).await
    }

    async fn mark_post_failed(
        &self,
        post_id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        posts::mark_post_failed(&self.pool, post_id, error, now).await
    }

    async fn release_post(&self, post_id: i64) -> Result<(), sqlx::Error> {
        posts::release_post(&self.pool, post_id).await
    }

    async fn claim_accounts_due_for_refresh(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<SocialAccount>, sqlx::Error> {
        accounts::claim_accounts_due_for_refresh(&self.pool, now, limit, lease).await
    }

    async fn claim_account_refresh(
        &self,
        account_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<SocialAccount>, sqlx::Error> {
        accounts::claim_account_refresh(&self.pool, account_id, now, lease).await
    }

    async fn count_accounts_needing_reconnect(
        &self,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        accounts::count_accounts_needing_reconnect(&self.pool, now).await
    }

    async fn store_refreshed_tokens(
        &self,
        account_id: i64,
        tokens: &RefreshedTokens,
    ) -> Result<(), sqlx::Error> {
        accounts::update_tokens(
            &self.pool,
            account_id,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            tokens.expires_at,
        )
        .await
    }

    async fn delete_stale_failed_posts(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = posts::delete_stale_failed_posts(&mut *tx, cutoff).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<(u64, u64), sqlx::Error> {
        let tokens = session::cleanup_expired_tokens(&self.pool, now).await?;
        let states = oauth_states::delete_stale_oauth_states(&self.pool, now).await?;
        Ok((tokens, states))
    }
}
