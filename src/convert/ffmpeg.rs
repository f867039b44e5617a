use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use tracing::{info, warn};

use super::{ConvertError, Converter};
use crate::coordinator::CancelHandle;
use crate::progress::{ProgressSink, ProgressUnit};

#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            width: 144,
            height: 256,
            fps: 2,
            video_bitrate: "50k".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Muxes an audio file onto a black still-image video track.
///
/// The picture never changes, so it is encoded at a tiny resolution and frame
/// rate; encoding time is dominated by the audio.
pub struct FfmpegConverter {
    options: FfmpegOptions,
}

impl FfmpegConverter {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }

    /// Audio duration in seconds, via ffprobe.
    fn probe_duration(&self, input: &Path) -> Result<f64, ConvertError> {
        let output = Command::new(&self.options.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input)
            .output()
            .map_err(|e| ConvertError::Failed(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(ConvertError::Failed(format!(
                "ffprobe failed with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| ConvertError::Failed(format!("Unreadable audio duration: {}", e)))
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let o = &self.options;
        let mut cmd = Command::new(&o.ffmpeg);
        cmd.args(["-y", "-hide_banner", "-nostats", "-loglevel", "error"])
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(format!("color=c=black:s={}x{}:r={}", o.width, o.height, o.fps))
            .arg("-i")
            .arg(input)
            .args(["-map", "0:v", "-map", "1:a"])
            .args(["-c:v", "libx264", "-preset", "ultrafast", "-tune", "stillimage", "-pix_fmt", "yuv420p"])
            .arg("-b:v")
            .arg(&o.video_bitrate)
            .args(["-c:a", "aac"])
            .arg("-b:a")
            .arg(&o.audio_bitrate)
            .args(["-movflags", "+faststart", "-shortest", "-progress", "pipe:1"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Frame counter from one line of ffmpeg's `-progress` output.
pub fn parse_progress_frame(line: &str) -> Option<u64> {
    line.trim().strip_prefix("frame=")?.trim().parse().ok()
}

/// Total frames the encoder will emit for `duration` seconds at `fps`.
pub fn total_frames(duration: f64, fps: u32) -> u64 {
    if !duration.is_finite() || duration <= 0.0 {
        return 0;
    }
    (duration * fps as f64).ceil() as u64
}

fn remove_partial(output: &Path) {
    if output.exists() {
        if let Err(e) = fs::remove_file(output) {
            warn!("Failed to remove partial output {}: {}", output.display(), e);
        }
    }
}

fn stop(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill ffmpeg: {}", e);
    }
    let _ = child.wait();
}

impl Converter for FfmpegConverter {
    fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressSink,
        cancel: &CancelHandle,
    ) -> Result<(), ConvertError> {
        progress.start_phase("Probing audio...", ProgressUnit::Frames);
        let duration = self.probe_duration(input)?;
        let total = total_frames(duration, self.options.fps);
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        info!("Encoding {} ({:.1}s, {} frames) to {}", input.display(), duration, total, output.display());
        progress.set_phase("Encoding video...");
        progress.report(0, total);

        let mut child = self
            .command(input, output)
            .spawn()
            .map_err(|e| ConvertError::Failed(format!("Failed to execute ffmpeg: {}", e)))?;

        // drained on its own thread so a chatty encoder cannot block on a full pipe
        let stderr = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                if cancel.is_cancelled() {
                    stop(&mut child);
                    remove_partial(output);
                    return Err(ConvertError::Cancelled);
                }
                let Ok(line) = line else { break };
                if let Some(frame) = parse_progress_frame(&line) {
                    progress.report(frame.min(total), total);
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| ConvertError::Failed(format!("Failed to wait for ffmpeg: {}", e)))?;
        let stderr = stderr.and_then(|handle| handle.join().ok()).unwrap_or_default();

        if cancel.is_cancelled() && !status.success() {
            remove_partial(output);
            return Err(ConvertError::Cancelled);
        }
        if !status.success() {
            remove_partial(output);
            return Err(ConvertError::Failed(format!(
                "FFmpeg conversion failed with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        progress.set_phase("Finalizing...");
        progress.report(total, total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CancelRegistry;
    use crate::progress::ProgressSnapshot;

    #[test]
    fn test_parse_progress_frame() {
        assert_eq!(parse_progress_frame("frame=42"), Some(42));
        assert_eq!(parse_progress_frame("frame=  7\n"), Some(7));
        assert_eq!(parse_progress_frame("fps=2.00"), None);
        assert_eq!(parse_progress_frame("frame=N/A"), None);
        assert_eq!(parse_progress_frame("progress=end"), None);
    }

    #[test]
    fn test_total_frames() {
        assert_eq!(total_frames(10.0, 2), 20);
        assert_eq!(total_frames(10.2, 2), 21);
        assert_eq!(total_frames(0.0, 2), 0);
        assert_eq!(total_frames(f64::NAN, 2), 0);
    }

    #[test]
    fn test_missing_binary_is_a_failure() {
        let converter = FfmpegConverter::new(FfmpegOptions {
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
            ..Default::default()
        });
        let registry = CancelRegistry::new();
        let cancel = registry.register(1);
        let (sink, _rx) = ProgressSink::channel(ProgressSnapshot::new("", ProgressUnit::Frames));

        let result = converter.convert(Path::new("in.mp3"), Path::new("out.mp4"), &sink, &cancel);
        assert!(matches!(result, Err(ConvertError::Failed(_))));
    }
}
