use std::fmt::Display;
use std::time::Duration;
use async_trait::async_trait;
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::UserId;

pub mod sqlite;
pub mod memory;

pub use sqlite::SqliteTaskStore;
pub use memory::InMemoryTaskStore;

/// What happened to a user's job, as recorded in the usage log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageAction {
    Upload,
    Success,
    Failed,
    Cancelled,
}

impl UsageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageAction::Upload => "UPLOAD",
            UsageAction::Success => "SUCCESS",
            UsageAction::Failed => "FAILED",
            UsageAction::Cancelled => "CANCELLED",
        }
    }
}

impl TryFrom<String> for UsageAction {
    type Error = String;
    fn try_from(action: String) -> Result<Self, Self::Error> {
        match action.as_str() {
            "UPLOAD" => Ok(UsageAction::Upload),
            "SUCCESS" => Ok(UsageAction::Success),
            "FAILED" => Ok(UsageAction::Failed),
            "CANCELLED" => Ok(UsageAction::Cancelled),
            _ => Err(format!("Invalid usage action: {}", action)),
        }
    }
}

impl Display for UsageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub active_tasks: u64,
    pub total_conversions: u64,
    pub unique_users: u64,
}

/// Durable per-user job lock plus the append-only usage log.
///
/// The lock table is the single-flight gate: `try_acquire` must be an atomic
/// insert-if-absent, `release` an idempotent delete. Each lock records the
/// job that took it so a job can only ever release its own lock.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn try_acquire(&self, user_id: UserId, job_id: &str) -> Result<bool>;
    /// Unconditional delete, for manual cancel and resets.
    async fn release(&self, user_id: UserId) -> Result<()>;
    /// Delete the lock only while `job_id` still holds it; returns whether it did.
    async fn release_owned(&self, user_id: UserId, job_id: &str) -> Result<bool>;
    async fn is_locked(&self, user_id: UserId) -> Result<bool>;
    /// Drop locks older than `max_age`; returns how many were removed.
    async fn sweep_stale(&self, max_age: Duration) -> Result<u64>;
    /// Drop usage log entries older than `retention`.
    async fn trim_logs(&self, retention: Duration) -> Result<u64>;
    async fn append_log(&self, user_id: UserId, action: UsageAction) -> Result<()>;
    async fn stats(&self) -> Result<UsageStats>;
    async fn all_user_ids(&self) -> Result<Vec<UserId>>;
    /// Remove every lock regardless of age.
    async fn clear_all(&self) -> Result<u64>;
}
