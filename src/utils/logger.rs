use std::path::Path;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber: stdout plus a daily rolling file in `log_dir`.
///
/// `RUST_LOG` overrides the default `info` filter. Keep the returned guard
/// alive for the life of the process or buffered file output is lost.
pub fn init(log_dir: impl AsRef<Path>) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir.as_ref())?;
    let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir.as_ref(), "mp4bot.log"));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()?;

    Ok(guard)
}
