use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;
use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{TaskStore, UsageAction, UsageStats};
use crate::UserId;

#[derive(Debug, Clone)]
struct LockEntry {
    job_id: String,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LogEntry {
    user_id: UserId,
    action: UsageAction,
    at: DateTime<Utc>,
}

/// Process-local store, for tests and single-instance runs without a database.
#[derive(Default)]
pub struct InMemoryTaskStore {
    locks: RwLock<HashMap<UserId, LockEntry>>,
    logs: RwLock<Vec<LogEntry>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_at(&self, user_id: UserId, job_id: &str, started_at: DateTime<Utc>) -> Result<bool> {
        let mut locks = self.locks.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        if locks.contains_key(&user_id) {
            return Ok(false);
        }
        locks.insert(user_id, LockEntry { job_id: job_id.to_string(), started_at });
        Ok(true)
    }

    /// Job currently holding `user_id`'s lock.
    pub fn holder(&self, user_id: UserId) -> Option<String> {
        let locks = self.locks.read().ok()?;
        locks.get(&user_id).map(|entry| entry.job_id.clone())
    }

    /// Usage log entries recorded for `user_id`, oldest first.
    pub fn actions_for(&self, user_id: UserId) -> Vec<UsageAction> {
        match self.logs.read() {
            Ok(logs) => logs
                .iter()
                .filter(|entry| entry.user_id == user_id)
                .map(|entry| entry.action)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn cutoff(max_age: Duration) -> Result<DateTime<Utc>> {
    Ok(Utc::now() - chrono::Duration::from_std(max_age)?)
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn try_acquire(&self, user_id: UserId, job_id: &str) -> Result<bool> {
        self.acquire_at(user_id, job_id, Utc::now())
    }

    async fn release(&self, user_id: UserId) -> Result<()> {
        let mut locks = self.locks.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        locks.remove(&user_id);
        Ok(())
    }

    async fn release_owned(&self, user_id: UserId, job_id: &str) -> Result<bool> {
        let mut locks = self.locks.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        match locks.get(&user_id) {
            Some(entry) if entry.job_id == job_id => {
                locks.remove(&user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, user_id: UserId) -> Result<bool> {
        let locks = self.locks.read().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(locks.contains_key(&user_id))
    }

    async fn sweep_stale(&self, max_age: Duration) -> Result<u64> {
        let cutoff = cutoff(max_age)?;
        let mut locks = self.locks.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let before = locks.len();
        locks.retain(|_, entry| entry.started_at >= cutoff);
        Ok((before - locks.len()) as u64)
    }

    async fn trim_logs(&self, retention: Duration) -> Result<u64> {
        let cutoff = cutoff(retention)?;
        let mut logs = self.logs.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let before = logs.len();
        logs.retain(|entry| entry.at >= cutoff);
        Ok((before - logs.len()) as u64)
    }

    async fn append_log(&self, user_id: UserId, action: UsageAction) -> Result<()> {
        let mut logs = self.logs.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        logs.push(LogEntry { user_id, action, at: Utc::now() });
        Ok(())
    }

    async fn stats(&self) -> Result<UsageStats> {
        let active_tasks = self.locks.read().map_err(|e| anyhow::anyhow!(e.to_string()))?.len() as u64;
        let logs = self.logs.read().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let total_conversions = logs.iter().filter(|entry| entry.action == UsageAction::Success).count() as u64;
        let unique_users = logs.iter().map(|entry| entry.user_id).collect::<BTreeSet<_>>().len() as u64;

        Ok(UsageStats {
            active_tasks,
            total_conversions,
            unique_users,
        })
    }

    async fn all_user_ids(&self) -> Result<Vec<UserId>> {
        let logs = self.logs.read().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(logs.iter().map(|entry| entry.user_id).collect::<BTreeSet<_>>().into_iter().collect())
    }

    async fn clear_all(&self) -> Result<u64> {
        let mut locks = self.locks.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let cleared = locks.len() as u64;
        locks.clear();
        Ok(cleared)
    }
}
