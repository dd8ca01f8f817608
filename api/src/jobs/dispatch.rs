//! Scheduled post dispatch: claim due posts, publish each on its platform,
//! record the outcome. One post failing never stops the rest of the batch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};

use super::{JobContext, JobError};
use crate::domain::Platform;
use crate::domain::accounts::SocialAccount;
use crate::domain::posts::DuePost;
use crate::services::auth::refresh_account_tokens;
use crate::services::platforms::{PlatformClient, PublishRequest, PublishedPost};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub published: usize,
    pub failed: usize,
    /// Released untouched, retried on a later tick
    pub deferred: usize,
}

/// What happened to a single post
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Published { external_id: String },
    Failed { error: String },
    Deferred,
}

/// One dispatch tick. Errors only if the claim itself fails.
///
/// Posts for the same account run one after another so an expired token is
/// refreshed once per batch; different accounts run concurrently.
pub async fn run_dispatch(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome, JobError> {
    let due = ctx
        .store
        .claim_due_posts(now, ctx.settings.batch_size, ctx.settings.claim_lease)
        .await?;

    if due.is_empty() {
        return Ok(DispatchOutcome::default());
    }
    tracing::debug!(claimed = due.len(), "claimed due posts");

    let mut by_account: HashMap<(i64, Platform), Vec<DuePost>> = HashMap::new();
    for post in due {
        by_account
            .entry((post.user_id, post.platform))
            .or_default()
            .push(post);
    }

    let results: Vec<_> = stream::iter(by_account.into_values())
        .map(|posts| async move {
            let mut results = Vec::with_capacity(posts.len());
            for post in posts {
                let result = dispatch_post(ctx, &post, now).await;
                results.push((post.id, result));
            }
            results
        })
        .buffer_unordered(ctx.settings.concurrency)
        .collect()
        .await;

    let mut outcome = DispatchOutcome::default();
    for (post_id, result) in results.into_iter().flatten() {
        match result {
            Ok(PostOutcome::Published { .. }) => outcome.published += 1,
            Ok(PostOutcome::Failed { .. }) => outcome.failed += 1,
            Ok(PostOutcome::Deferred) => outcome.deferred += 1,
            Err(e) => {
                // Lease stays; the post is picked up again once it lapses
                tracing::error!(post_id, error = %e, "failed to record dispatch result");
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}

/// Publish one claimed post and persist the result.
/// `Err` means the result could not be written, not that publishing failed.
pub async fn dispatch_post(
    ctx: &JobContext,
    post: &DuePost,
    now: DateTime<Utc>,
) -> Result<PostOutcome, sqlx::Error> {
    match publish(ctx, post, now).await {
        Ok(published) => {
            ctx.store
                .mark_post_published(post.id, &published.external_id, now)
                .await?;
            tracing::info!(
                post_id = post.id,
                platform = %post.platform,
                external_id = %published.external_id,
                "post published"
            );
            Ok(PostOutcome::Published {
                external_id: published.external_id,
            })
        }
        Err(JobError::RefreshInProgress(platform)) => {
            ctx.store.release_post(post.id).await?;
            tracing::debug!(
                post_id = post.id,
                platform = %platform,
                "token refresh in progress elsewhere, post deferred"
            );
            Ok(PostOutcome::Deferred)
        }
        Err(e) => {
            let error = e.to_string();
            ctx.store.mark_post_failed(post.id, &error, now).await?;
            tracing::warn!(
                post_id = post.id,
                platform = %post.platform,
                error = %error,
                "post failed"
            );
            Ok(PostOutcome::Failed { error })
        }
    }
}

async fn publish(
    ctx: &JobContext,
    post: &DuePost,
    now: DateTime<Utc>,
) -> Result<PublishedPost, JobError> {
    let client = ctx.platforms.get(post.platform)?;
    let account = ctx
        .store
        .find_account(post.user_id, post.platform)
        .await?
        .ok_or(JobError::AccountNotConnected(post.platform))?;

    let access_token = ensure_valid_access_token(ctx, client.as_ref(), &account, now).await?;
    let video_url = ctx.urls.read_url(&post.storage_location).await?;

    let request = PublishRequest {
        platform_user_id: account.platform_user_id.clone(),
        video_url,
        content_type: post.content_type.clone(),
        caption: post.caption.clone(),
    };
    Ok(client.publish(&access_token, &request).await?)
}

/// Current access token, refreshed inline (and persisted) if it has expired.
/// The refresh takes the account's refresh lease, the same one the token
/// refresh job uses, so a refresh token is never spent twice.
async fn ensure_valid_access_token(
    ctx: &JobContext,
    client: &dyn PlatformClient,
    account: &SocialAccount,
    now: DateTime<Utc>,
) -> Result<String, JobError> {
    if !account.token_expired(now) {
        return Ok(account.access_token.clone());
    }
    if account.needs_reconnect(now) {
        return Err(JobError::ReconnectRequired(account.platform));
    }

    let claimed = ctx
        .store
        .claim_account_refresh(account.id, now, ctx.settings.claim_lease)
        .await?;
    let Some(account) = claimed else {
        // Refreshed since we read it, or someone else is refreshing it now
        let current = ctx
            .store
            .find_account(account.user_id, account.platform)
            .await?
            .ok_or(JobError::AccountNotConnected(account.platform))?;
        if current.token_expired(now) {
            return Err(JobError::RefreshInProgress(account.platform));
        }
        return Ok(current.access_token);
    };

    let tokens = refresh_account_tokens(client, &account, now).await?;
    ctx.store.store_refreshed_tokens(account.id, &tokens).await?;
    tracing::debug!(
        account_id = account.id,
        platform = %account.platform,
        "refreshed token before publish"
    );
    Ok(tokens.access_token)
}
