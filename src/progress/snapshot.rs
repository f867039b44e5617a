use std::sync::Arc;
use tokio::sync::watch;

use super::format::ProgressUnit;

/// Latest known progress of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub current: u64,
    pub total: u64,
    pub phase: String,
    pub unit: ProgressUnit,
}

impl ProgressSnapshot {
    pub fn new(phase: impl Into<String>, unit: ProgressUnit) -> Self {
        Self {
            current: 0,
            total: 0,
            phase: phase.into(),
            unit,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// Write side of a job's progress snapshot.
///
/// Cloned into the blocking converter; the relay holds the matching
/// [`watch::Receiver`] and only ever sees the most recent value.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl ProgressSink {
    pub fn channel(initial: ProgressSnapshot) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn report(&self, current: u64, total: u64) {
        self.tx.send_modify(|snapshot| {
            snapshot.current = current;
            snapshot.total = total;
        });
    }

    pub fn set_phase(&self, phase: impl Into<String>) {
        let phase = phase.into();
        self.tx.send_modify(|snapshot| snapshot.phase = phase);
    }

    /// Switch to a new phase, resetting the counters.
    pub fn start_phase(&self, phase: impl Into<String>, unit: ProgressUnit) {
        self.tx.send_replace(ProgressSnapshot::new(phase, unit));
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }
}
