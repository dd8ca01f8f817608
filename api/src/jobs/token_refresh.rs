//! Token refresh: renew platform tokens ahead of the next dispatch.
//!
//! OAuth refresh-token platforms are refreshed once expired. Meta tokens can
//! only be exchanged while still valid, so they are renewed inside the last
//! `RENEWAL_LEAD_DAYS` of their lifetime instead.

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};

use super::{JobContext, JobError};
use crate::domain::accounts::SocialAccount;
use crate::services::auth::refresh_account_tokens;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub refreshed: usize,
    pub failed: usize,
    /// Expired accounts no refresh can recover
    pub needs_reconnect: i64,
}

/// Claim accounts due for refresh and refresh each. A failed refresh keeps its lease,
/// so the account is retried once the lease lapses.
pub async fn run_token_refresh(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<RefreshOutcome, JobError> {
    let accounts = ctx
        .store
        .claim_accounts_due_for_refresh(now, ctx.settings.batch_size, ctx.settings.claim_lease)
        .await?;

    let results: Vec<_> = stream::iter(accounts)
        .map(|account| async move {
            let result = refresh_one(ctx, &account, now).await;
            (account, result)
        })
        .buffer_unordered(ctx.settings.concurrency)
        .collect()
        .await;

    let mut outcome = RefreshOutcome::default();
    for (account, result) in results {
        match result {
            Ok(()) => outcome.refreshed += 1,
            Err(e) => {
                tracing::warn!(
                    account_id = account.id,
                    user_id = account.user_id,
                    platform = %account.platform,
                    error = %e,
                    "token refresh failed"
                );
                outcome.failed += 1;
            }
        }
    }
    outcome.needs_reconnect = ctx.store.count_accounts_needing_reconnect(now).await?;
    Ok(outcome)
}

async fn refresh_one(
    ctx: &JobContext,
    account: &SocialAccount,
    now: DateTime<Utc>,
) -> Result<(), JobError> {
    let client = ctx.platforms.get(account.platform)?;
    let tokens = refresh_account_tokens(client.as_ref(), account, now).await?;
    ctx.store.store_refreshed_tokens(account.id, &tokens).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Platform;
    use crate::jobs::testing::{FakeClient, MemoryStore, context};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn refreshes_exactly_the_expired_set() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::default());
        let expired =
            store.add_account(1, Platform::Tiktok, now - Duration::minutes(5), Some("rt-1"));
        let valid = store.add_account(2, Platform::Tiktok, now + Duration::hours(2), Some("rt-2"));
        let no_refresh = store.add_account(3, Platform::Tiktok, now - Duration::hours(1), None);
        let also_expired =
            store.add_account(4, Platform::Youtube, now - Duration::days(1), Some("rt-4"));

        let tiktok = FakeClient::new(Platform::Tiktok);
        let youtube = FakeClient::new(Platform::Youtube);
        let ctx = context(store.clone(), vec![tiktok.clone(), youtube.clone()]);

        let outcome = run_token_refresh(&ctx, now).await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome {
                refreshed: 2,
                failed: 0,
                needs_reconnect: 1
            }
        );
        assert_eq!(tiktok.refreshed(), vec!["rt-1".to_string()]);
        assert_eq!(youtube.refreshed(), vec!["rt-4".to_string()]);

        let expired = store.account(expired);
        assert_eq!(expired.access_token, "tiktok-fresh-token");
        // platform did not rotate it
        assert_eq!(expired.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(expired.expires_at, now + Duration::hours(1));
        assert_eq!(expired.refresh_claimed_until, None);

        assert_eq!(store.account(also_expired).access_token, "youtube-fresh-token");
        assert_eq!(store.account(valid).access_token, "tiktok-old-token");
        assert_eq!(store.account(no_refresh).access_token, "tiktok-old-token");
    }

    #[tokio::test]
    async fn failure_keeps_lease_and_retries_after_it_lapses() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::default());
        let expired = now - Duration::minutes(1);
        let broken = store.add_account(1, Platform::Tiktok, expired, Some("rt"));
        let fine = store.add_account(2, Platform::Youtube, expired, Some("rt"));

        let tiktok = FakeClient::new(Platform::Tiktok).failing_refresh();
        let ctx = context(
            store.clone(),
            vec![tiktok.clone(), FakeClient::new(Platform::Youtube)],
        );

        let outcome = run_token_refresh(&ctx, now).await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome {
                refreshed: 1,
                failed: 1,
                needs_reconnect: 0
            }
        );

        let broken_account = store.account(broken);
        assert_eq!(broken_account.access_token, "tiktok-old-token");
        assert_eq!(
            broken_account.refresh_claimed_until,
            Some(now + ctx.settings.claim_lease)
        );
        assert_eq!(store.account(fine).refresh_claimed_until, None);

        // still leased on the next tick
        let soon = now + Duration::minutes(1);
        assert_eq!(
            run_token_refresh(&ctx, soon).await.unwrap(),
            RefreshOutcome::default()
        );

        let later = now + ctx.settings.claim_lease + Duration::seconds(1);
        assert_eq!(run_token_refresh(&ctx, later).await.unwrap().failed, 1);
        assert_eq!(tiktok.refreshed().len(), 2);
    }

    #[tokio::test]
    async fn meta_tokens_are_renewed_before_they_expire() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::default());
        let expiring =
            store.add_account(1, Platform::Facebook, now + Duration::days(3), Some("fb-ll"));
        let fresh =
            store.add_account(2, Platform::Facebook, now + Duration::days(50), Some("fb-ll-2"));
        let lapsed =
            store.add_account(3, Platform::Instagram, now - Duration::hours(1), Some("ig-ll"));

        let facebook = FakeClient::new(Platform::Facebook);
        let instagram = FakeClient::new(Platform::Instagram);
        let ctx = context(store.clone(), vec![facebook.clone(), instagram.clone()]);

        let outcome = run_token_refresh(&ctx, now).await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome {
                refreshed: 1,
                failed: 0,
                needs_reconnect: 1
            }
        );
        assert_eq!(facebook.refreshed(), vec!["fb-ll".to_string()]);
        assert!(instagram.refreshed().is_empty());

        assert_eq!(store.account(expiring).access_token, "facebook-fresh-token");
        assert_eq!(store.account(fresh).access_token, "facebook-old-token");
        let lapsed = store.account(lapsed);
        assert_eq!(lapsed.access_token, "instagram-old-token");
        assert_eq!(lapsed.refresh_claimed_until, None);
    }
}
