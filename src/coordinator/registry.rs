use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

use crate::UserId;

/// Read side of one job's cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: u64,
    token: CancellationToken,
}

impl CancelHandle {
    fn new(id: u64) -> Self {
        Self { id, token: CancellationToken::new() }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

/// Cancellation signals of the jobs currently running in this process.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    entries: RwLock<HashMap<UserId, CancelHandle>>,
    next_id: AtomicU64,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh signal for `user_id`, replacing any previous entry.
    pub fn register(&self, user_id: UserId) -> CancelHandle {
        let handle = CancelHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, handle.clone());
        handle
    }

    /// Set the signal of `user_id`'s running job. Returns `false` when this
    /// process has no such job.
    pub fn request_cancel(&self, user_id: UserId) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&user_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove `user_id`'s entry only if it is still `handle`. A job that
    /// outlived its lock must not drop the entry of the job that replaced it.
    pub fn unregister(&self, user_id: UserId, handle: &CancelHandle) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&user_id) {
            Some(current) if current.id == handle.id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Signal every registered job; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        for handle in entries.values() {
            handle.cancel();
        }
        entries.len()
    }

    pub fn is_registered(&self, user_id: UserId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
