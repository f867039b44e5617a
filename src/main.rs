#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use tracing::{debug, info, warn};
use std::sync::Arc;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use mp4bot_rs::{
    broadcast::Broadcaster,
    config::SETTINGS,
    convert::FfmpegConverter,
    coordinator::{CancelRegistry, CoordinatorConfig, TaskCoordinator},
    observer::{EventObserver, HttpObserver, Observer, ObserverEvent},
    storage::task::{SqliteTaskStore, TaskStore},
    sweeper::{StaleLockSweeper, SweeperConfig},
    utils::logger,
    AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = &*SETTINGS;
    settings.prepare_dirs()?;
    let _guard = logger::init(&settings.log_dir)?;

    info!("Starting MP3 to MP4 bot ({})", env!("GIT_HASH"));

    info!("Initializing Storage...");
    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(&settings.database_url).await?);

    let observer: Arc<dyn Observer> = match &settings.webhook_url {
        Some(url) => {
            info!("Reporting to webhook at {}", url);
            Arc::new(HttpObserver::new(url.clone())?)
        }
        None => {
            info!("No webhook configured, job updates go to the log");
            let (observer, mut events) = EventObserver::new(64);
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(ObserverEvent::Rendered { user_id, text, .. }) => debug!("[user {}]\n{}", user_id, text),
                        Ok(ObserverEvent::Delivered { user_id, video, .. }) => {
                            info!("Video {} ready for user {}", video.display(), user_id)
                        }
                        Err(RecvError::Lagged(skipped)) => debug!("Skipped {} job updates", skipped),
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            Arc::new(observer)
        }
    };

    info!("Initializing Coordinator...");
    let coordinator = TaskCoordinator::new(
        store.clone(),
        Arc::new(CancelRegistry::new()),
        Arc::new(FfmpegConverter::new(settings.ffmpeg_options())),
        observer.clone(),
        CoordinatorConfig::from(settings),
    );

    let ctx = Arc::new(AppContext {
        coordinator,
        broadcaster: Arc::new(Broadcaster::new(store.clone(), observer)),
        owner_token: settings.owner_token.clone(),
    });

    let shutdown = CancellationToken::new();
    let sweeper = StaleLockSweeper::new(store, SweeperConfig::from(settings));
    let sweeper_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { sweeper.run(shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
            shutdown.cancel();
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!("Starting HTTP server at http://{}", addr);

    match mp4bot_rs::web::start_server(ctx.clone(), addr, shutdown.clone()).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            shutdown.cancel();
            return Err(e);
        }
    }

    info!("Shutting down...");
    let registry = ctx.coordinator.registry();
    let signalled = registry.cancel_all();
    if signalled > 0 {
        info!("Signalled {} running jobs, waiting for teardown", signalled);
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("{} jobs still running at exit, locks left to the sweeper", registry.len());
        }
    }
    let _ = sweeper_handle.await;

    Ok(())
}
