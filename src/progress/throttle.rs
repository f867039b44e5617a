use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::format::render_progress_box;
use super::snapshot::ProgressSnapshot;
use crate::observer::{Controls, Observer};
use crate::UserId;

/// Rate-limits progress boxes for a single job.
///
/// An update goes out when nothing has been sent yet, when at least
/// `min_interval` has passed since the last one, or when the snapshot reports
/// a completion not yet shown. Observer failures are swallowed.
pub struct ThrottledNotifier {
    observer: Arc<dyn Observer>,
    user_id: UserId,
    task_name: String,
    min_interval: Duration,
    started_at: Instant,
    last_emitted: Option<Instant>,
    last_snapshot: Option<ProgressSnapshot>,
}

impl ThrottledNotifier {
    pub fn new(
        observer: Arc<dyn Observer>,
        user_id: UserId,
        task_name: impl Into<String>,
        min_interval: Duration,
        started_at: Instant,
    ) -> Self {
        Self {
            observer,
            user_id,
            task_name: task_name.into(),
            min_interval,
            started_at,
            last_emitted: None,
            last_snapshot: None,
        }
    }

    fn should_emit(&self, snapshot: &ProgressSnapshot, now: Instant) -> bool {
        if snapshot.is_complete() && self.last_snapshot.as_ref() != Some(snapshot) {
            return true;
        }
        match self.last_emitted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    /// Render and send `snapshot` if the throttle allows it.
    ///
    /// Returns whether an update was attempted. `now` is the caller's notion of
    /// the current instant (the relay passes its scheduled tick).
    pub async fn maybe_notify(&mut self, snapshot: &ProgressSnapshot, now: Instant) -> bool {
        if !self.should_emit(snapshot, now) {
            return false;
        }
        self.emit(snapshot, now).await;
        true
    }

    /// Final send once the work is done: skipped when `snapshot` is exactly
    /// what the last box already showed.
    pub async fn flush(&mut self, snapshot: &ProgressSnapshot, now: Instant) -> bool {
        if self.last_snapshot.as_ref() == Some(snapshot) {
            return false;
        }
        self.maybe_notify(snapshot, now).await
    }

    async fn emit(&mut self, snapshot: &ProgressSnapshot, now: Instant) {
        self.last_emitted = Some(now);
        self.last_snapshot = Some(snapshot.clone());

        let text = render_progress_box(
            snapshot.current,
            snapshot.total,
            &self.task_name,
            &snapshot.phase,
            now.saturating_duration_since(self.started_at),
            snapshot.unit,
        );
        if let Err(e) = self.observer.render(self.user_id, &text, Controls::Cancel).await {
            debug!("Progress update for user {} dropped: {}", self.user_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::format::ProgressUnit;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        texts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Observer for Recorder {
        async fn render(&self, _user_id: UserId, text: &str, _controls: Controls) -> Result<()> {
            self.texts.lock().unwrap().push(text.to_string());
            if self.fail {
                anyhow::bail!("observer unreachable");
            }
            Ok(())
        }

        async fn deliver(&self, _user_id: UserId, _video: &Path, _caption: &str) -> Result<()> {
            Ok(())
        }
    }

    fn frames(current: u64, total: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            current,
            total,
            phase: "Encoding video...".to_string(),
            unit: ProgressUnit::Frames,
        }
    }

    #[tokio::test]
    async fn test_throttles_to_interval_and_flushes_completion() {
        let recorder = Arc::new(Recorder::default());
        let start = Instant::now();
        let mut notifier = ThrottledNotifier::new(
            recorder.clone(),
            1,
            "Job",
            Duration::from_secs(4),
            start,
        );

        // current = 0,10,...,100 spread evenly over 20 time units
        let mut emitted = Vec::new();
        for step in 0..=10u64 {
            let now = start + Duration::from_secs(step * 2);
            if notifier.maybe_notify(&frames(step * 10, 100), now).await {
                emitted.push(step * 10);
            }
        }

        assert!(emitted.len() <= 6, "emitted {:?}", emitted);
        assert_eq!(emitted.last(), Some(&100));
        let texts = recorder.texts.lock().unwrap();
        assert_eq!(texts.len(), emitted.len());
        assert!(texts.last().unwrap().contains("100.0%"));
    }

    #[tokio::test]
    async fn test_completion_bypasses_interval() {
        let recorder = Arc::new(Recorder::default());
        let start = Instant::now();
        let mut notifier = ThrottledNotifier::new(recorder.clone(), 1, "Job", Duration::from_secs(60), start);

        assert!(notifier.maybe_notify(&frames(1, 100), start).await);
        assert!(!notifier.maybe_notify(&frames(50, 100), start + Duration::from_secs(1)).await);
        assert!(notifier.maybe_notify(&frames(100, 100), start + Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_flush_skips_repeated_final_box() {
        let recorder = Arc::new(Recorder::default());
        let start = Instant::now();
        let mut notifier = ThrottledNotifier::new(recorder.clone(), 1, "Job", Duration::from_secs(4), start);

        assert!(notifier.maybe_notify(&frames(100, 100), start).await);
        assert!(!notifier.maybe_notify(&frames(100, 100), start + Duration::from_secs(1)).await);
        assert!(!notifier.flush(&frames(100, 100), start + Duration::from_secs(2)).await);
        assert_eq!(recorder.texts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_sends_unseen_completion() {
        let recorder = Arc::new(Recorder::default());
        let start = Instant::now();
        let mut notifier = ThrottledNotifier::new(recorder.clone(), 1, "Job", Duration::from_secs(4), start);

        assert!(notifier.maybe_notify(&frames(40, 100), start).await);
        assert!(notifier.flush(&frames(100, 100), start + Duration::from_secs(1)).await);
        // throttled progress is still held back
        assert!(!notifier.flush(&frames(0, 0), start + Duration::from_secs(2)).await);
        let texts = recorder.texts.lock().unwrap();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("100.0%"));
    }

    #[tokio::test]
    async fn test_unknown_total_is_not_completion() {
        let recorder = Arc::new(Recorder::default());
        let start = Instant::now();
        let mut notifier = ThrottledNotifier::new(recorder.clone(), 1, "Job", Duration::from_secs(4), start);

        assert!(notifier.maybe_notify(&frames(0, 0), start).await);
        assert!(!notifier.maybe_notify(&frames(0, 0), start + Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_observer_failure_is_swallowed() {
        let recorder = Arc::new(Recorder { fail: true, ..Default::default() });
        let start = Instant::now();
        let mut notifier = ThrottledNotifier::new(recorder.clone(), 1, "Job", Duration::from_secs(4), start);

        assert!(notifier.maybe_notify(&frames(5, 100), start).await);
        // the failed send still counts against the interval
        assert!(!notifier.maybe_notify(&frames(6, 100), start + Duration::from_secs(1)).await);
        assert!(notifier.maybe_notify(&frames(7, 100), start + Duration::from_secs(4)).await);
        assert_eq!(recorder.texts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_each_job_throttles_independently() {
        let recorder = Arc::new(Recorder::default());
        let start = Instant::now();
        let mut first = ThrottledNotifier::new(recorder.clone(), 1, "Job", Duration::from_secs(4), start);
        let mut second = ThrottledNotifier::new(recorder.clone(), 2, "Job", Duration::from_secs(4), start);

        assert!(first.maybe_notify(&frames(1, 10), start).await);
        assert!(second.maybe_notify(&frames(1, 10), start).await);
    }
}
