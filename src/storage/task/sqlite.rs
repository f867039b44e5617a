use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::{TaskStore, UsageAction, UsageStats};
use crate::UserId;

/// SQLite-backed store. Timestamps are stored as unix milliseconds.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Initializing SQLite task store at {}", database_url);
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                user_id INTEGER PRIMARY KEY,
                job_id TEXT NOT NULL,
                started_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_logs_created_at ON usage_logs (created_at)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Insert-if-absent with an explicit start time.
    pub async fn acquire_at(&self, user_id: UserId, job_id: &str, started_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO tasks (user_id, job_id, started_at) VALUES (?, ?, ?) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(job_id)
        .bind(started_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn append_log_at(&self, user_id: UserId, action: UsageAction, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO usage_logs (user_id, action, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(action.as_str())
            .bind(at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn started_at(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = sqlx::query_scalar("SELECT started_at FROM tasks WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(millis.and_then(DateTime::from_timestamp_millis))
    }
}

fn cutoff_millis(max_age: Duration) -> Result<i64> {
    let max_age = chrono::Duration::from_std(max_age)?;
    Ok((Utc::now() - max_age).timestamp_millis())
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn try_acquire(&self, user_id: UserId, job_id: &str) -> Result<bool> {
        self.acquire_at(user_id, job_id, Utc::now()).await
    }

    async fn release(&self, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_owned(&self, user_id: UserId, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE user_id = ? AND job_id = ?")
            .bind(user_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_locked(&self, user_id: UserId) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar("SELECT user_id FROM tasks WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn sweep_stale(&self, max_age: Duration) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE started_at < ?")
            .bind(cutoff_millis(max_age)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn trim_logs(&self, retention: Duration) -> Result<u64> {
        let result = sqlx::query("DELETE FROM usage_logs WHERE created_at < ?")
            .bind(cutoff_millis(retention)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_log(&self, user_id: UserId, action: UsageAction) -> Result<()> {
        self.append_log_at(user_id, action, Utc::now()).await
    }

    async fn stats(&self) -> Result<UsageStats> {
        let active_tasks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        let total_conversions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_logs WHERE action = ?")
            .bind(UsageAction::Success.as_str())
            .fetch_one(&self.pool)
            .await?;
        let unique_users: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM usage_logs")
            .fetch_one(&self.pool)
            .await?;

        Ok(UsageStats {
            active_tasks: active_tasks as u64,
            total_conversions: total_conversions as u64,
            unique_users: unique_users as u64,
        })
    }

    async fn all_user_ids(&self) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar("SELECT DISTINCT user_id FROM usage_logs ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
