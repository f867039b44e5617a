use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::coordinator::CancelHandle;
use crate::progress::{ProgressSink, ProgressUnit};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,
    #[error("HTTP request failed with status: {0}")]
    Status(reqwest::StatusCode),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to write file: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream `url` into `dest`, reporting bytes through `progress`.
///
/// `expected_size` seeds the total when the server sends no content length.
/// The cancel signal is checked between chunks; a cancelled or failed download
/// leaves whatever was written for the caller to clean up.
pub async fn download_audio(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    expected_size: Option<u64>,
    progress: &ProgressSink,
    cancel: &CancelHandle,
) -> Result<u64, DownloadError> {
    info!("Starting download from URL: {}", url);
    progress.start_phase("Downloading Audio...", ProgressUnit::Bytes);

    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir).await?;
    }

    let mut response = tokio::select! {
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        response = client.get(url).send() => response?,
    };
    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }

    let total = response.content_length().or(expected_size).unwrap_or(0);
    let mut file = fs::File::create(dest).await?;
    let mut written = 0u64;
    progress.report(0, total);

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            chunk = response.chunk() => chunk?,
        };
        let Some(chunk) = chunk else { break };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        progress.report(written, total.max(written));
    }
    file.flush().await?;

    info!("Download completed: {} bytes to {}", written, dest.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CancelRegistry;
    use crate::progress::ProgressSnapshot;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn sink() -> (ProgressSink, tokio::sync::watch::Receiver<ProgressSnapshot>) {
        ProgressSink::channel(ProgressSnapshot::new("", ProgressUnit::Bytes))
    }

    #[tokio::test]
    async fn test_download_audio() {
        let addr = serve(Router::new().route("/a.mp3", get(|| async { vec![7u8; 4096] }))).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested").join("a.mp3");
        let registry = CancelRegistry::new();
        let cancel = registry.register(1);
        let (progress, rx) = sink();

        let written = download_audio(
            &reqwest::Client::new(),
            &format!("http://{}/a.mp3", addr),
            &dest,
            None,
            &progress,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        let seen = rx.borrow().clone();
        assert_eq!((seen.current, seen.total), (4096, 4096));
        assert_eq!(seen.phase, "Downloading Audio...");
    }

    #[tokio::test]
    async fn test_download_error_status() {
        let addr = serve(Router::new()).await;
        let dir = TempDir::new().unwrap();
        let registry = CancelRegistry::new();
        let cancel = registry.register(1);
        let (progress, _rx) = sink();

        let result = download_audio(
            &reqwest::Client::new(),
            &format!("http://{}/missing.mp3", addr),
            &dir.path().join("m.mp3"),
            None,
            &progress,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Status(status)) if status == reqwest::StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_download_stops_on_cancel() {
        // the server stalls long past the cancel request
        let app = Router::new().route(
            "/slow.mp3",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let addr = serve(app).await;
        let dir = TempDir::new().unwrap();
        let registry = CancelRegistry::new();
        let cancel = registry.register(1);
        let (progress, _rx) = sink();

        let client = reqwest::Client::new();
        let url = format!("http://{}/slow.mp3", addr);
        let dest = dir.path().join("slow.mp3");
        let download = download_audio(
            &client,
            &url,
            &dest,
            Some(1 << 20),
            &progress,
            &cancel,
        );
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            registry.request_cancel(1);
        };
        let (result, ()) = tokio::join!(download, canceller);

        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }
}
