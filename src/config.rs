use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use once_cell::sync::Lazy;
use tracing::warn;

use crate::convert::FfmpegOptions;

const DATABASE_URL: &str = "sqlite://./mp4bot_data/storage.db?mode=rwc";
const WORK_DIR: &str = "./mp4bot_data/work";
const LOG_DIR: &str = "./logs";

pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub work_dir: PathBuf,
    pub log_dir: PathBuf,
    pub port: u16,
    pub webhook_url: Option<String>,
    /// bearer token for the admin routes; admin is disabled when unset
    pub owner_token: Option<String>,
    pub relay_interval: Duration,
    pub stale_lock_after: Duration,
    pub sweep_period: Duration,
    pub log_retention: Duration,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DATABASE_URL.to_string(),
            work_dir: PathBuf::from(WORK_DIR),
            log_dir: PathBuf::from(LOG_DIR),
            port: 8080,
            webhook_url: None,
            owner_token: None,
            relay_interval: Duration::from_secs(4),
            stale_lock_after: Duration::from_secs(3600),
            sweep_period: Duration::from_secs(3600),
            log_retention: Duration::from_secs(24 * 3600),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Process environment first, then `.env`.
fn lookup(key: &str) -> Option<String> {
    env::var(key)
        .or_else(|_| dotenv::var(key))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Settings::default();
        Self {
            database_url: lookup("MP4BOT_DATABASE_URL").unwrap_or(defaults.database_url),
            work_dir: lookup("MP4BOT_WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
            log_dir: lookup("MP4BOT_LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            port: parse_or("PORT", defaults.port),
            webhook_url: lookup("MP4BOT_WEBHOOK_URL"),
            owner_token: lookup("MP4BOT_OWNER_TOKEN"),
            relay_interval: Duration::from_secs(parse_or("MP4BOT_RELAY_INTERVAL_SECS", defaults.relay_interval.as_secs())),
            stale_lock_after: Duration::from_secs(parse_or("MP4BOT_STALE_LOCK_SECS", defaults.stale_lock_after.as_secs())),
            sweep_period: Duration::from_secs(parse_or("MP4BOT_SWEEP_PERIOD_SECS", defaults.sweep_period.as_secs())),
            log_retention: Duration::from_secs(
                parse_or("MP4BOT_LOG_RETENTION_HOURS", defaults.log_retention.as_secs() / 3600) * 3600,
            ),
            ffmpeg: lookup("MP4BOT_FFMPEG").map(PathBuf::from).unwrap_or(defaults.ffmpeg),
            ffprobe: lookup("MP4BOT_FFPROBE").map(PathBuf::from).unwrap_or(defaults.ffprobe),
        }
    }

    pub fn ffmpeg_options(&self) -> FfmpegOptions {
        FfmpegOptions {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            ..Default::default()
        }
    }

    /// Ensure the on-disk locations exist.
    pub fn prepare_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        if let Some(db_path) = self.database_url.strip_prefix("sqlite://") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(dir) = std::path::Path::new(db_path).parent() {
                std::fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}
