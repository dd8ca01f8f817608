//! In-memory job store and platform fakes for job tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::store::JobStore;
use super::{JobContext, JobSettings};
use crate::domain::Platform;
use crate::domain::accounts::SocialAccount;
use crate::domain::oauth_states::OAUTH_STATE_TTL_MINUTES;
use crate::domain::posts::{DuePost, Post, PostStatus};
use crate::services::auth::RefreshedTokens;
use crate::services::platforms::{
    PlatformClient, PlatformError, PlatformProfile, PlatformRegistry, PublishRequest, PublishedPost,
    TokenGrant,
};
use crate::storage::{StorageError, VideoUrls};

#[derive(Default)]
struct Inner {
    next_id: i64,
    posts: Vec<Post>,
    videos: HashMap<i64, String>,
    accounts: Vec<SocialAccount>,
    refresh_token_expiries: Vec<DateTime<Utc>>,
    oauth_state_created: Vec<DateTime<Utc>>,
}

impl Inner {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn due_post(&self, post: &Post) -> DuePost {
        DuePost {
            id: post.id,
            user_id: post.user_id,
            platform: post.platform,
            caption: post.caption.clone(),
            storage_location: self.videos[&post.video_id].clone(),
            content_type: "video/mp4".to_string(),
        }
    }
}

fn refresh_free(account: &SocialAccount, now: DateTime<Utc>) -> bool {
    account.refresh_claimed_until.is_none_or(|until| until < now)
}

/// Applies the same selection rules as the SQL, via the model predicates
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn add_video(&self, location: &str) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.id();
        inner.videos.insert(id, location.to_string());
        id
    }

    pub fn add_account(
        &self,
        user_id: i64,
        platform: Platform,
        expires_at: DateTime<Utc>,
        refresh_token: Option<&str>,
    ) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.id();
        let created = expires_at - Duration::days(1);
        inner.accounts.push(SocialAccount {
            id,
            user_id,
            platform,
            platform_user_id: format!("{}-user-{}", platform, user_id),
            display_name: None,
            access_token: format!("{}-old-token", platform),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            refresh_claimed_until: None,
            created_at: created,
            updated_at: created,
        });
        id
    }

    fn add_post(
        &self,
        user_id: i64,
        video_id: i64,
        platform: Platform,
        status: PostStatus,
        scheduled_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.id();
        inner.posts.push(Post {
            id,
            video_id,
            user_id,
            platform,
            caption: Some("caption".to_string()),
            status,
            scheduled_at,
            external_id: None,
            publish_error: None,
            attempts: 0,
            claimed_until: None,
            published_at: None,
            created_at: updated_at,
            updated_at,
        });
        id
    }

    pub fn add_scheduled(
        &self,
        user_id: i64,
        video_id: i64,
        platform: Platform,
        at: DateTime<Utc>,
    ) -> i64 {
        let created = at - Duration::hours(1);
        self.add_post(user_id, video_id, platform, PostStatus::Scheduled, Some(at), created)
    }

    pub fn add_finished(
        &self,
        video_id: i64,
        status: PostStatus,
        updated_at: DateTime<Utc>,
    ) -> i64 {
        self.add_post(1, video_id, Platform::Tiktok, status, None, updated_at)
    }

    pub fn add_refresh_token(&self, expires_at: DateTime<Utc>) {
        self.inner.lock().unwrap().refresh_token_expiries.push(expires_at);
    }

    pub fn add_oauth_state(&self, created_at: DateTime<Utc>) {
        self.inner.lock().unwrap().oauth_state_created.push(created_at);
    }

    pub fn set_claim(&self, post_id: i64, until: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(post) = inner.posts.iter_mut().find(|p| p.id == post_id) {
            post.claimed_until = until;
        }
    }

    pub fn set_account_claim(&self, account_id: i64, until: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(account) = inner.accounts.iter_mut().find(|a| a.id == account_id) {
            account.refresh_claimed_until = until;
        }
    }

    pub fn post(&self, id: i64) -> Post {
        let inner = self.inner.lock().unwrap();
        inner.posts.iter().find(|p| p.id == id).cloned().unwrap()
    }

    pub fn has_post(&self, id: i64) -> bool {
        self.inner.lock().unwrap().posts.iter().any(|p| p.id == id)
    }

    pub fn account(&self, id: i64) -> SocialAccount {
        let inner = self.inner.lock().unwrap();
        inner.accounts.iter().find(|a| a.id == id).cloned().unwrap()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn claim_due_posts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<DuePost>, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let mut due: Vec<usize> = (0..inner.posts.len())
            .filter(|&i| inner.posts[i].is_due(now) && inner.posts[i].is_unclaimed(now))
            .collect();
        due.sort_by_key(|&i| inner.posts[i].scheduled_at);
        due.truncate(limit as usize);

        let mut claimed = Vec::new();
        for i in due {
            inner.posts[i].claimed_until = Some(now + lease);
            let post = inner.posts[i].clone();
            claimed.push(inner.due_post(&post));
        }
        Ok(claimed)
    }

    async fn claim_post(
        &self,
        post_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<DuePost>, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let Some(i) = inner.posts.iter().position(|p| {
            p.id == post_id
                && p.user_id == user_id
                && p.status == PostStatus::Scheduled
                && p.is_unclaimed(now)
        }) else {
            return Ok(None);
        };
        inner.posts[i].claimed_until = Some(now + lease);
        let post = inner.posts[i].clone();
        Ok(Some(inner.due_post(&post)))
    }

    async fn find_account(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> Result<Option<SocialAccount>, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .accounts
            .iter()
            .find(|a| a.user_id == user_id && a.platform == platform)
            .cloned())
    }

    async fn mark_post_published(
        &self,
        post_id: i64,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(post) = inner
            .posts
            .iter_mut()
            .find(|p| p.id == post_id && p.status == PostStatus::Scheduled)
        {
            post.status = PostStatus::Published;
            post.scheduled_at = None;
            post.external_id = Some(external_id.to_string());
            post.publish_error = None;
            post.attempts += 1;
            post.claimed_until = None;
            post.published_at = Some(now);
            post.updated_at = now;
        }
        Ok(())
    }

    async fn mark_post_failed(
        &self,
        post_id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(post) = inner
            .posts
            .iter_mut()
            .find(|p| p.id == post_id && p.status == PostStatus::Scheduled)
        {
            post.status = PostStatus::Failed;
            post.scheduled_at = None;
            post.publish_error = Some(error.to_string());
            post.attempts += 1;
            post.claimed_until = None;
            post.updated_at = now;
        }
        Ok(())
    }

    async fn release_post(&self, post_id: i64) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(post) = inner
            .posts
            .iter_mut()
            .find(|p| p.id == post_id && p.status == PostStatus::Scheduled)
        {
            post.claimed_until = None;
        }
        Ok(())
    }

    async fn claim_accounts_due_for_refresh(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<SocialAccount>, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let mut claimed = Vec::new();
        for account in inner.accounts.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if account.due_for_refresh(now) && refresh_free(account, now) {
                account.refresh_claimed_until = Some(now + lease);
                claimed.push(account.clone());
            }
        }
        Ok(claimed)
    }

    async fn claim_account_refresh(
        &self,
        account_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<SocialAccount>, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let Some(account) = inner.accounts.iter_mut().find(|a| {
            a.id == account_id && a.token_expired(now) && refresh_free(a, now)
        }) else {
            return Ok(None);
        };
        account.refresh_claimed_until = Some(now + lease);
        Ok(Some(account.clone()))
    }

    async fn count_accounts_needing_reconnect(
        &self,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.accounts.iter().filter(|a| a.needs_reconnect(now)).count() as i64)
    }

    async fn store_refreshed_tokens(
        &self,
        account_id: i64,
        tokens: &RefreshedTokens,
    ) -> Result<(), sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(account) = inner.accounts.iter_mut().find(|a| a.id == account_id) {
            account.access_token = tokens.access_token.clone();
            if let Some(rt) = &tokens.refresh_token {
                account.refresh_token = Some(rt.clone());
            }
            account.expires_at = tokens.expires_at;
            account.refresh_claimed_until = None;
        }
        Ok(())
    }

    async fn delete_stale_failed_posts(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.posts.len();
        inner
            .posts
            .retain(|p| !(p.status == PostStatus::Failed && p.updated_at < cutoff));
        Ok((before - inner.posts.len()) as u64)
    }

    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<(u64, u64), sqlx::Error> {
        let mut inner = self.inner.lock().unwrap();
        let tokens_before = inner.refresh_token_expiries.len();
        inner.refresh_token_expiries.retain(|exp| *exp >= now);
        let states_before = inner.oauth_state_created.len();
        let state_cutoff = now - Duration::minutes(OAUTH_STATE_TTL_MINUTES);
        inner.oauth_state_created.retain(|created| *created >= state_cutoff);
        Ok((
            (tokens_before - inner.refresh_token_expiries.len()) as u64,
            (states_before - inner.oauth_state_created.len()) as u64,
        ))
    }
}

#[derive(Default)]
struct Calls {
    published_with: Vec<String>,
    published_urls: Vec<String>,
    refreshed: Vec<String>,
}

/// Scriptable platform client that records what it was asked to do
#[derive(Clone)]
pub struct FakeClient {
    platform: Platform,
    fail_publish: bool,
    fail_refresh: bool,
    calls: Arc<Mutex<Calls>>,
}

impl FakeClient {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            fail_publish: false,
            fail_refresh: false,
            calls: Arc::default(),
        }
    }

    pub fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn published_with(&self) -> Vec<String> {
        self.calls.lock().unwrap().published_with.clone()
    }

    pub fn published_urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().published_urls.clone()
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.calls.lock().unwrap().refreshed.clone()
    }
}

#[async_trait]
impl PlatformClient for FakeClient {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn authorize_url(&self, state: &str, code_challenge: &str) -> String {
        format!(
            "https://{}.test/authorize?state={}&code_challenge={}",
            self.platform, state, code_challenge
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: &str,
    ) -> Result<TokenGrant, PlatformError> {
        Ok(TokenGrant {
            access_token: format!("{}-{}", self.platform, code),
            refresh_token: Some("refresh".to_string()),
            expires_in: Some(3600),
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, PlatformError> {
        self.calls.lock().unwrap().refreshed.push(refresh_token.to_string());
        if self.fail_refresh {
            return Err(PlatformError::Api {
                status: 401,
                body: "invalid_grant".to_string(),
            });
        }
        Ok(TokenGrant {
            access_token: format!("{}-fresh-token", self.platform),
            refresh_token: None,
            expires_in: Some(3600),
        })
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<PlatformProfile, PlatformError> {
        Ok(PlatformProfile {
            id: format!("{}-profile", self.platform),
            display_name: Some("Miso".to_string()),
        })
    }

    async fn publish(
        &self,
        access_token: &str,
        request: &PublishRequest,
    ) -> Result<PublishedPost, PlatformError> {
        if self.fail_publish {
            return Err(PlatformError::Api {
                status: 400,
                body: "rejected".to_string(),
            });
        }
        let mut calls = self.calls.lock().unwrap();
        calls.published_with.push(access_token.to_string());
        calls.published_urls.push(request.video_url.clone());
        Ok(PublishedPost {
            external_id: format!("{}-{}", self.platform, calls.published_with.len()),
        })
    }
}

pub struct FakeUrls;

#[async_trait]
impl VideoUrls for FakeUrls {
    async fn read_url(&self, storage_location: &str) -> Result<String, StorageError> {
        Ok(format!("https://media.test/{}", storage_location))
    }
}

pub fn settings() -> JobSettings {
    JobSettings {
        batch_size: 50,
        concurrency: 4,
        claim_lease: Duration::minutes(5),
        failed_post_retention: Duration::days(30),
    }
}

pub fn context(store: Arc<MemoryStore>, clients: Vec<FakeClient>) -> JobContext {
    let mut platforms = PlatformRegistry::default();
    for client in clients {
        platforms.insert(Arc::new(client));
    }
    JobContext {
        store,
        platforms,
        urls: Arc::new(FakeUrls),
        settings: settings(),
    }
}
