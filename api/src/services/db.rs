//! Database pool lifecycle and transaction conventions
//!
//! The pool is built once in `main` from [`DatabaseConfig`] and handed to
//! handlers and jobs through their state; it is closed on shutdown.
//!
//! Domain functions use sqlx's generic Executor trait, so they accept both
//! `&PgPool` and `&mut PgConnection` (transactions):
//!
//! ```ignore
//! let mut tx = state.db.begin().await.log_500("Begin transaction error")?;
//! domain::posts::insert_post(&mut *tx, ...).await.log_500("Insert post error")?;
//! tx.commit().await.log_500("Commit error")?;
//! ```

use apalis_sql::postgres::PostgresStorage;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use crate::config::DatabaseConfig;

/// Connect the pool and apply pending migrations
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.url)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Apply our schema and the apalis job tables.
///
/// Both migrators record into the same `_sqlx_migrations` table, so each must
/// tolerate versions that belong to the other.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut app = sqlx::migrate!("./migrations");
    app.set_ignore_missing(true);
    app.run(pool).await?;

    let mut jobs = PostgresStorage::<()>::migrations();
    jobs.set_ignore_missing(true);
    jobs.run(pool).await?;

    Ok(())
}

/// Pool for tests that need a real Postgres, from `DATABASE_URL`.
/// Returns `None` when it is not set so those tests are skipped.
#[cfg(test)]
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("DATABASE_URL is set but not reachable");
    migrate(&pool).await.expect("migrations failed");
    Some(pool)
}

/// A fresh user so tests against a shared database only touch their own rows.
/// Deleting it cascades to everything the test created.
#[cfg(test)]
pub async fn test_user(pool: &PgPool) -> i64 {
    let email = format!("test-{:016x}@misoauto.test", rand::random::<u64>());
    crate::domain::users::insert_user(pool, &email, "not-a-hash")
        .await
        .expect("insert test user")
        .expect("test email collided")
        .id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn app_and_job_migrations_share_the_bookkeeping_table() {
        let Some(pool) = test_pool().await else {
            return;
        };

        // A second boot sees both sets of versions already applied
        migrate(&pool).await.unwrap();

        let (posts,): (Option<String>,) = sqlx::query_as("SELECT to_regclass('posts')::text")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(posts.as_deref(), Some("posts"));

        let (jobs,): (Option<String>,) = sqlx::query_as("SELECT to_regclass('apalis.jobs')::text")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(jobs.as_deref(), Some("apalis.jobs"));
    }
}
