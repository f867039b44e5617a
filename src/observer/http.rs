use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use anyhow::Result;
use reqwest::multipart;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use super::{Controls, Observer};
use crate::UserId;

/// Webhook observer: status updates go out as JSON, finished videos as a
/// multipart upload to `<base>/deliver` streamed from disk.
pub struct HttpObserver {
    client: reqwest::Client,
    webhook_url: String,
}

#[derive(Debug, Serialize)]
struct RenderPayload<'a> {
    user_id: UserId,
    text: &'a str,
    controls: Controls,
}

impl HttpObserver {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}", self.webhook_url, action)
    }
}

#[async_trait]
impl Observer for HttpObserver {
    async fn render(&self, user_id: UserId, text: &str, controls: Controls) -> Result<()> {
        let payload = RenderPayload { user_id, text, controls };
        self.client
            .post(self.endpoint("render"))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn deliver(&self, user_id: UserId, video: &Path, caption: &str) -> Result<()> {
        let file = tokio::fs::File::open(video).await?;
        let len = file.metadata().await?.len();
        let file_name = video
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, len)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = multipart::Form::new()
            .text("user_id", user_id.to_string())
            .text("caption", caption.to_string())
            .part("video", part);

        self.client
            .post(self.endpoint("deliver"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_render_posts_json() -> Result<()> {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let app = Router::new().route(
            "/hook/render",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.push(body);
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let observer = HttpObserver::new(format!("http://{}/hook/", addr))?;
        observer.render(42, "hello", Controls::Cancel).await?;

        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["user_id"], 42);
        assert_eq!(received[0]["text"], "hello");
        assert_eq!(received[0]["controls"], "cancel");
        Ok(())
    }

    #[tokio::test]
    async fn test_deliver_streams_video_file() -> Result<()> {
        let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let app = Router::new().route(
            "/hook/deliver",
            post(move |body: axum::body::Bytes| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.extend_from_slice(&body);
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let dir = tempfile::TempDir::new()?;
        let video = dir.path().join("job.mp4");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&video, &content).await?;

        let observer = HttpObserver::new(format!("http://{}/hook", addr))?;
        observer.deliver(7, &video, "done").await?;

        let received = received.lock().await;
        let body = String::from_utf8_lossy(&received);
        assert!(body.contains("filename=\"job.mp4\""));
        assert!(body.contains("video/mp4"));
        assert!(received.windows(content.len()).any(|window| window == content.as_slice()));
        Ok(())
    }

    #[tokio::test]
    async fn test_render_surfaces_unreachable_webhook() -> Result<()> {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let observer = HttpObserver::new(format!("http://{}", addr))?;
        assert!(observer.render(1, "x", Controls::None).await.is_err());
        Ok(())
    }
}
