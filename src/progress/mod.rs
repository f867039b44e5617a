pub mod format;
pub mod snapshot;
pub mod throttle;

pub use format::{render_progress_box, ProgressUnit};
pub use snapshot::{ProgressSink, ProgressSnapshot};
pub use throttle::ThrottledNotifier;
