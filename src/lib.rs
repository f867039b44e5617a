pub mod broadcast;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod observer;
pub mod progress;
pub mod storage;
pub mod sweeper;
pub mod utils;
pub mod web;

use std::sync::Arc;
use broadcast::Broadcaster;
use coordinator::TaskCoordinator;

/// Chat-platform user id.
pub type UserId = i64;

pub struct AppContext {
    pub coordinator: TaskCoordinator,
    pub broadcaster: Arc<Broadcaster>,
    /// bearer token guarding the admin routes
    pub owner_token: Option<String>,
}
