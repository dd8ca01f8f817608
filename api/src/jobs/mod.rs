//! Background jobs, run by an apalis monitor next to the HTTP server.
//!
//! Each job is a cron stream piped into Postgres-backed apalis storage. Handlers
//! always return `Ok`: a failed run is logged and the next tick tries again.
//! Row leases (`claimed_until`) keep concurrent instances from doing the same work.

pub mod cleanup;
pub mod dispatch;
pub mod store;
pub mod token_refresh;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use crate::config::JobsConfig;
use crate::domain::Platform;
use crate::services::platforms::{PlatformError, PlatformRegistry};
use crate::storage::{StorageError, VideoUrls};
use store::JobStore;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0} account not connected")]
    AccountNotConnected(Platform),
    #[error("{0} token expired, account must be reconnected")]
    ReconnectRequired(Platform),
    /// Another worker holds the account's refresh lease
    #[error("{0} token refresh already in progress")]
    RefreshInProgress(Platform),
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub batch_size: i64,
    pub concurrency: usize,
    pub claim_lease: Duration,
    pub failed_post_retention: Duration,
}

impl From<&JobsConfig> for JobSettings {
    fn from(config: &JobsConfig) -> Self {
        Self {
            batch_size: config.dispatch_batch_size,
            concurrency: config.dispatch_concurrency,
            claim_lease: config.claim_lease,
            failed_post_retention: config.failed_post_retention,
        }
    }
}

/// Everything a job needs, shared with the publish-now route
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub platforms: PlatformRegistry,
    pub urls: Arc<dyn VideoUrls>,
    pub settings: JobSettings,
}

macro_rules! tick_job {
    ($name:ident) => {
        /// Cron tick marker; the payload is only the fire time
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub scheduled_at: DateTime<Utc>,
        }

        impl From<DateTime<Utc>> for $name {
            fn from(dt: DateTime<Utc>) -> Self {
                $name { scheduled_at: dt }
            }
        }
    };
}

tick_job!(DispatchTick);
tick_job!(TokenRefreshTick);
tick_job!(CleanupTick);

async fn dispatch_job(_job: DispatchTick, ctx: Data<JobContext>) -> Result<(), Error> {
    match dispatch::run_dispatch(&ctx, Utc::now()).await {
        Ok(outcome) => {
            if outcome != dispatch::DispatchOutcome::default() {
                tracing::info!(
                    published = outcome.published,
                    failed = outcome.failed,
                    deferred = outcome.deferred,
                    "dispatch run complete"
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "dispatch run failed"),
    }
    Ok(())
}

async fn token_refresh_job(_job: TokenRefreshTick, ctx: Data<JobContext>) -> Result<(), Error> {
    match token_refresh::run_token_refresh(&ctx, Utc::now()).await {
        Ok(outcome) => {
            if outcome.refreshed > 0 || outcome.failed > 0 {
                tracing::info!(
                    refreshed = outcome.refreshed,
                    failed = outcome.failed,
                    "token refresh run complete"
                );
            }
            if outcome.needs_reconnect > 0 {
                tracing::warn!(
                    accounts = outcome.needs_reconnect,
                    "expired accounts cannot be refreshed and need reconnecting"
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "token refresh run failed"),
    }
    Ok(())
}

async fn cleanup_job(_job: CleanupTick, ctx: Data<JobContext>) -> Result<(), Error> {
    match cleanup::run_cleanup(&ctx, Utc::now()).await {
        Ok(outcome) => tracing::info!(
            deleted_posts = outcome.deleted_posts,
            expired_refresh_tokens = outcome.expired_refresh_tokens,
            stale_oauth_states = outcome.stale_oauth_states,
            "cleanup run complete"
        ),
        Err(e) => tracing::error!(error = %e, "cleanup run failed"),
    }
    Ok(())
}

/// Register the three cron workers and run until `shutdown` resolves.
pub async fn run_scheduler<F>(
    pool: PgPool,
    ctx: JobContext,
    config: JobsConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    // Job tables are migrated with ours in `services::db::migrate`
    let dispatch_storage: PostgresStorage<DispatchTick> = PostgresStorage::new(pool.clone());
    let dispatch_backend =
        CronStream::new(Schedule::from_str(&config.dispatch_cron)?)
            .pipe_to_storage(dispatch_storage);

    let refresh_storage: PostgresStorage<TokenRefreshTick> = PostgresStorage::new(pool.clone());
    let refresh_backend = CronStream::new(Schedule::from_str(&config.token_refresh_cron)?)
        .pipe_to_storage(refresh_storage);

    let cleanup_storage: PostgresStorage<CleanupTick> = PostgresStorage::new(pool.clone());
    let cleanup_backend =
        CronStream::new(Schedule::from_str(&config.cleanup_cron)?).pipe_to_storage(cleanup_storage);

    let dispatch_worker = WorkerBuilder::new("post-dispatch")
        .data(ctx.clone())
        .backend(dispatch_backend)
        .build_fn(dispatch_job);

    let refresh_worker = WorkerBuilder::new("token-refresh")
        .data(ctx.clone())
        .backend(refresh_backend)
        .build_fn(token_refresh_job);

    let cleanup_worker = WorkerBuilder::new("failed-post-cleanup")
        .data(ctx)
        .backend(cleanup_backend)
        .build_fn(cleanup_job);

    tracing::info!(
        dispatch = %config.dispatch_cron,
        token_refresh = %config.token_refresh_cron,
        cleanup = %config.cleanup_cron,
        "job scheduler starting"
    );

    Monitor::new()
        .register(dispatch_worker)
        .register(refresh_worker)
        .register(cleanup_worker)
        .run_with_signal(async move {
            shutdown.await;
            Ok(())
        })
        .await?;

    tracing::info!("job scheduler stopped");
    Ok(())
}
