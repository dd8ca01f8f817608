//! Daily cleanup: failed posts past retention, expired sessions, abandoned OAuth flows.

use chrono::{DateTime, Utc};

use super::{JobContext, JobError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub deleted_posts: u64,
    pub expired_refresh_tokens: u64,
    pub stale_oauth_states: u64,
}

pub async fn run_cleanup(ctx: &JobContext, now: DateTime<Utc>) -> Result<CleanupOutcome, JobError> {
    let cutoff = now - ctx.settings.failed_post_retention;
    let deleted_posts = ctx.store.delete_stale_failed_posts(cutoff).await?;
    let (expired_refresh_tokens, stale_oauth_states) = ctx.store.sweep_expired_sessions(now).await?;

    Ok(CleanupOutcome {
        deleted_posts,
        expired_refresh_tokens,
        stale_oauth_states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::posts::PostStatus;
    use crate::jobs::testing::{MemoryStore, context};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn deletes_only_stale_failures() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::default());
        let video = store.add_video("videos/user_1/a.mp4");

        let stale = store.add_finished(video, PostStatus::Failed, now - Duration::days(45));
        let recent = store.add_finished(video, PostStatus::Failed, now - Duration::days(10));
        let old_published =
            store.add_finished(video, PostStatus::Published, now - Duration::days(45));
        let scheduled =
            store.add_scheduled(1, video, crate::domain::Platform::Tiktok, now + Duration::days(1));

        let ctx = context(store.clone(), vec![]);
        let outcome = run_cleanup(&ctx, now).await.unwrap();
        assert_eq!(outcome.deleted_posts, 1);

        assert!(!store.has_post(stale));
        assert!(store.has_post(recent));
        assert!(store.has_post(old_published));
        assert!(store.has_post(scheduled));

        // idempotent
        assert_eq!(run_cleanup(&ctx, now).await.unwrap().deleted_posts, 0);
    }

    #[tokio::test]
    async fn sweeps_sessions_and_oauth_states() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::default());
        store.add_refresh_token(now - Duration::days(1));
        store.add_refresh_token(now + Duration::days(29));
        store.add_oauth_state(now - Duration::hours(1));
        store.add_oauth_state(now - Duration::minutes(2));

        let ctx = context(store, vec![]);
        let outcome = run_cleanup(&ctx, now).await.unwrap();
        assert_eq!(
            outcome,
            CleanupOutcome {
                deleted_posts: 0,
                expired_refresh_tokens: 1,
                stale_oauth_states: 1,
            }
        );
    }
}
