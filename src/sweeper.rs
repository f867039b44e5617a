use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Settings;
use crate::storage::task::TaskStore;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// locks older than this belong to a crashed or stuck job
    pub stale_after: Duration,
    pub period: Duration,
    pub log_retention: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(3600),
            period: Duration::from_secs(3600),
            log_retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl From<&Settings> for SweeperConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            stale_after: settings.stale_lock_after,
            period: settings.sweep_period,
            log_retention: settings.log_retention,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub stale_locks: u64,
    pub trimmed_logs: u64,
}

/// Periodically drops locks left behind by jobs that never tore down.
pub struct StaleLockSweeper {
    store: Arc<dyn TaskStore>,
    config: SweeperConfig,
}

impl StaleLockSweeper {
    pub fn new(store: Arc<dyn TaskStore>, config: SweeperConfig) -> Self {
        Self { store, config }
    }

    /// Run both sweeps even if one fails; the first error is returned.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let stale_locks = self.store.sweep_stale(self.config.stale_after).await;
        match &stale_locks {
            Ok(0) => {}
            Ok(n) => info!("Removed {} stale task locks", n),
            Err(e) => error!("Error sweeping stale locks: {}", e),
        }
        let trimmed_logs = self.store.trim_logs(self.config.log_retention).await;
        match &trimmed_logs {
            Ok(0) => {}
            Ok(n) => info!("Trimmed {} usage log entries", n),
            Err(e) => error!("Error trimming usage logs: {}", e),
        }
        Ok(SweepReport { stale_locks: stale_locks?, trimmed_logs: trimmed_logs? })
    }

    /// Sweep now and then every period until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stale lock sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    // failures are already logged per step
                    let _ = self.sweep_once().await;
                }
            }
        }
    }
}
