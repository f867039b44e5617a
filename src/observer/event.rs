use std::path::{Path, PathBuf};
use async_trait::async_trait;
use anyhow::Result;
use tokio::sync::broadcast;

use super::{Controls, Observer};
use crate::UserId;

#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Rendered { user_id: UserId, text: String, controls: Controls },
    Delivered { user_id: UserId, video: PathBuf, caption: String },
}

/// In-process observer publishing every update on a broadcast channel.
#[derive(Clone)]
pub struct EventObserver {
    sender: broadcast::Sender<ObserverEvent>,
}

impl EventObserver {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ObserverEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Observer for EventObserver {
    async fn render(&self, user_id: UserId, text: &str, controls: Controls) -> Result<()> {
        self.sender.send(ObserverEvent::Rendered {
            user_id,
            text: text.to_string(),
            controls,
        })?;
        Ok(())
    }

    async fn deliver(&self, user_id: UserId, video: &Path, caption: &str) -> Result<()> {
        self.sender.send(ObserverEvent::Delivered {
            user_id,
            video: video.to_path_buf(),
            caption: caption.to_string(),
        })?;
        Ok(())
    }
}
