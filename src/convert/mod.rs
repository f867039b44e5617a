use std::path::Path;
use thiserror::Error;

use crate::coordinator::CancelHandle;
use crate::progress::ProgressSink;

pub mod ffmpeg;

pub use ffmpeg::{FfmpegConverter, FfmpegOptions};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("conversion cancelled")]
    Cancelled,
    #[error("conversion failed: {0}")]
    Failed(String),
}

/// Blocking audio-to-video conversion.
///
/// Runs on a blocking worker thread. Implementations must check `cancel` at
/// least once per unit of work and return [`ConvertError::Cancelled`] when it
/// is set, and should report through `progress` at a bounded cadence.
pub trait Converter: Send + Sync + 'static {
    fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressSink,
        cancel: &CancelHandle,
    ) -> Result<(), ConvertError>;
}
