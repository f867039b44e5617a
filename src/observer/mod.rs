use std::path::Path;
use async_trait::async_trait;
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::UserId;

pub mod http;
pub mod event;

pub use http::HttpObserver;
pub use event::{EventObserver, ObserverEvent};

/// Interactive controls attached to a rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Controls {
    None,
    /// a "Cancel ❌" button wired to the user's cancel request
    Cancel,
}

/// The remote party a job reports to: renders status text for a user and
/// receives the finished video.
#[async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn render(&self, user_id: UserId, text: &str, controls: Controls) -> Result<()>;
    async fn deliver(&self, user_id: UserId, video: &Path, caption: &str) -> Result<()>;
}
