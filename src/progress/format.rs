use std::time::Duration;
use serde::{Deserialize, Serialize};

const BAR_SEGMENTS: usize = 15;
const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// How the processed/total pair of a progress box is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProgressUnit {
    #[default]
    Bytes,
    Frames,
}

/// Render the live status box shown to the user while a job runs.
///
/// ```text
/// ┏ 🏷️ Name: MP3 to MP4 Conversion
/// ┃ [▤▤▤▤▤▤▤□□□□□□□□] 50.0%
/// ┠ 🔄 Processed: 50 of 100 (Frames)
/// ┠ ✨ Status: Encoding video... | ETA: 12s
/// ```
pub fn render_progress_box(
    current: u64,
    total: u64,
    task_name: &str,
    status: &str,
    elapsed: Duration,
    unit: ProgressUnit,
) -> String {
    let percentage = percentage(current, total);
    let filled = ((percentage / (100.0 / BAR_SEGMENTS as f64)) as usize).min(BAR_SEGMENTS);
    let bar = format!("{}{}", "▤".repeat(filled), "□".repeat(BAR_SEGMENTS - filled));

    let (processed, total_size) = match unit {
        ProgressUnit::Bytes => (format_bytes(current), format_bytes(total)),
        ProgressUnit::Frames => (current.to_string(), format!("{} (Frames)", total)),
    };

    format!(
        "┏ 🏷️ Name: {}\n┃ [{}] {:.1}%\n┠ 🔄 Processed: {} of {}\n┠ ✨ Status: {} | ETA: {}",
        task_name,
        bar,
        percentage,
        processed,
        total_size,
        status,
        format_eta(current, total, elapsed),
    )
}

/// Completion percentage clamped to `[0, 100]`; zero when the total is unknown.
pub fn percentage(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (current as f64 / total as f64 * 100.0).min(100.0)
}

pub fn format_bytes(size: u64) -> String {
    if size == 0 {
        return "0 B".to_string();
    }
    let mut scaled = size as f64;
    let mut exponent = 0;
    while scaled >= 1024.0 && exponent < BYTE_UNITS.len() - 1 {
        scaled /= 1024.0;
        exponent += 1;
    }
    format!("{:.2} {}", scaled, BYTE_UNITS[exponent])
}

/// Remaining time projected from the average rate so far.
pub fn format_eta(current: u64, total: u64, elapsed: Duration) -> String {
    if current == 0 {
        return "Calculating...".to_string();
    }

    let speed = current as f64 / elapsed.as_secs_f64();
    let remaining = (total as f64 - current as f64) / speed;
    // overshoot (current > total) projects a negative remainder
    if !(remaining > 0.0) {
        return "0s".to_string();
    }

    let remaining = remaining as u64;
    let (hours, minutes, seconds) = (remaining / 3600, remaining / 60 % 60, remaining % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
