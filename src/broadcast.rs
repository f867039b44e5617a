use std::num::NonZeroU32;
use std::sync::Arc;
use anyhow::Result;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::observer::{Controls, Observer};
use crate::storage::task::TaskStore;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Messages per second a broadcast may send.
pub const BROADCAST_RATE: u32 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub sent: usize,
}

/// Sends an announcement to every user who ever used the bot.
pub struct Broadcaster {
    store: Arc<dyn TaskStore>,
    observer: Arc<dyn Observer>,
    limiter: DirectRateLimiter,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn TaskStore>, observer: Arc<dyn Observer>) -> Self {
        Self::with_rate(store, observer, BROADCAST_RATE)
    }

    pub fn with_rate(store: Arc<dyn TaskStore>, observer: Arc<dyn Observer>, per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            store,
            observer,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    /// Users that cannot be reached are skipped.
    pub async fn broadcast(&self, text: &str) -> Result<BroadcastReport> {
        let users = self.store.all_user_ids().await?;
        info!("Broadcasting to {} users", users.len());

        let mut sent = 0;
        for user_id in &users {
            self.limiter.until_ready().await;
            match self.observer.render(*user_id, text, Controls::None).await {
                Ok(()) => sent += 1,
                Err(e) => debug!("Broadcast to user {} failed: {}", user_id, e),
            }
        }

        info!("Broadcast complete, sent to {} of {} users", sent, users.len());
        Ok(BroadcastReport { recipients: users.len(), sent })
    }
}
