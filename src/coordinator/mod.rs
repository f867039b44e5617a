mod registry;
mod guard;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use registry::{CancelHandle, CancelRegistry};
use guard::TeardownGuard;

use crate::config::Settings;
use crate::convert::{ConvertError, Converter};
use crate::observer::{Controls, Observer};
use crate::progress::{ProgressSink, ProgressSnapshot, ProgressUnit, ThrottledNotifier};
use crate::storage::task::{TaskStore, UsageAction, UsageStats};
use crate::utils::http::{download_audio, DownloadError};
use crate::UserId;

const DELIVERY_CAPTION: &str = "✅ Here is your MP4 video!";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("task store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),
}

/// Where a job's audio comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    /// fetched into the work dir before conversion
    Url { url: String, expected_size: Option<u64> },
    /// already on disk; the job takes ownership and removes it at teardown
    Local { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub user_id: UserId,
    pub source: InputSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedVideo {
    pub job_id: String,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded(ConvertedVideo),
    Failed { reason: String },
    Cancelled,
    AlreadyRunning,
}

/// How an admitted job ended. Only these reach teardown and the usage log.
#[derive(Debug)]
enum Finished {
    Succeeded(ConvertedVideo),
    Failed { reason: String },
    Cancelled,
}

impl Finished {
    fn usage_action(&self) -> UsageAction {
        match self {
            Finished::Succeeded(_) => UsageAction::Success,
            Finished::Failed { .. } => UsageAction::Failed,
            Finished::Cancelled => UsageAction::Cancelled,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Finished::Failed { reason: reason.into() }
    }
}

impl From<Finished> for JobOutcome {
    fn from(finished: Finished) -> Self {
        match finished {
            Finished::Succeeded(video) => JobOutcome::Succeeded(video),
            Finished::Failed { reason } => JobOutcome::Failed { reason },
            Finished::Cancelled => JobOutcome::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// a running job in this process was signalled
    Signalled,
    /// no job here, but a leftover durable lock was released
    LockCleared,
    NothingToCancel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub signalled: usize,
    pub locks_cleared: u64,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub work_dir: PathBuf,
    /// cadence of the progress relay, also the minimum gap between boxes
    pub relay_interval: Duration,
    pub task_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./mp4bot_data/work"),
            relay_interval: Duration::from_secs(4),
            task_name: "MP3 to MP4 Conversion".to_string(),
        }
    }
}

impl From<&Settings> for CoordinatorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            work_dir: settings.work_dir.clone(),
            relay_interval: settings.relay_interval,
            ..Default::default()
        }
    }
}

/// Files owned by one job, fixed at admission.
#[derive(Debug, Clone)]
pub(crate) struct JobFiles {
    pub(crate) input: PathBuf,
    pub(crate) output: PathBuf,
}

impl JobFiles {
    fn new(work_dir: &Path, job_id: &str, source: &InputSource) -> Self {
        let input = match source {
            InputSource::Url { .. } => work_dir.join(format!("{}.mp3", job_id)),
            InputSource::Local { path } => path.clone(),
        };
        Self {
            input,
            output: work_dir.join(format!("{}.mp4", job_id)),
        }
    }

    pub(crate) async fn remove(&self) {
        for path in [&self.input, &self.output] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }

    pub(crate) fn remove_blocking(&self) {
        for path in [&self.input, &self.output] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Admits at most one conversion per user and runs it to exactly one
/// terminal outcome with full cleanup.
#[derive(Clone)]
pub struct TaskCoordinator {
    store: Arc<dyn TaskStore>,
    registry: Arc<CancelRegistry>,
    converter: Arc<dyn Converter>,
    observer: Arc<dyn Observer>,
    http: reqwest::Client,
    config: Arc<CoordinatorConfig>,
}

impl TaskCoordinator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<CancelRegistry>,
        converter: Arc<dyn Converter>,
        observer: Arc<dyn Observer>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            converter,
            observer,
            http: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CancelRegistry> {
        &self.registry
    }

    /// Admit and run a job, returning once it has been fully torn down.
    pub async fn submit(&self, request: JobRequest) -> Result<JobOutcome, CoordinatorError> {
        match self.admit(request).await? {
            Some(job) => job.run().await,
            None => Ok(JobOutcome::AlreadyRunning),
        }
    }

    /// Take the user's durable lock and register a cancel signal.
    ///
    /// `Ok(None)` means the user already has a job in flight; nothing was
    /// registered or logged in that case.
    pub async fn admit(&self, request: JobRequest) -> Result<Option<AdmittedJob>, CoordinatorError> {
        let user_id = request.user_id;
        let job_id = Uuid::new_v4().to_string();
        let acquired = match self.store.try_acquire(user_id, &job_id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                error!("Failed to acquire lock for user {}: {}", user_id, e);
                let err = CoordinatorError::StoreUnavailable(e);
                self.send_final(user_id, &Err(&err)).await;
                return Err(err);
            }
        };
        if !acquired {
            info!("User {} already has a job in flight", user_id);
            self.send_final(user_id, &Ok(&JobOutcome::AlreadyRunning)).await;
            return Ok(None);
        }

        let files = JobFiles::new(&self.config.work_dir, &job_id, &request.source);
        let cancel = self.registry.register(user_id);
        let guard = TeardownGuard::new(self.clone(), user_id, job_id.clone(), files.clone(), cancel.clone());
        info!("Admitted job {} for user {}", job_id, user_id);

        Ok(Some(AdmittedJob {
            coordinator: self.clone(),
            job_id,
            user_id,
            source: request.source,
            files,
            cancel,
            guard,
        }))
    }

    /// Ask the user's running job to stop.
    ///
    /// Falls back to releasing the durable lock when no job of this process
    /// holds it, so a lock left behind by a crash can be cleared by hand.
    pub async fn cancel(&self, user_id: UserId) -> Result<CancelOutcome, CoordinatorError> {
        if self.registry.request_cancel(user_id) {
            info!("Cancellation requested for user {}", user_id);
            return Ok(CancelOutcome::Signalled);
        }

        let locked = self.store.is_locked(user_id).await.map_err(CoordinatorError::StoreUnavailable)?;
        if !locked {
            return Ok(CancelOutcome::NothingToCancel);
        }
        self.store.release(user_id).await.map_err(CoordinatorError::StoreUnavailable)?;
        warn!("Cleared orphaned lock for user {}", user_id);
        Ok(CancelOutcome::LockCleared)
    }

    /// Signal every running job and drop every durable lock.
    pub async fn clear_all(&self) -> Result<ClearReport, CoordinatorError> {
        let signalled = self.registry.cancel_all();
        let locks_cleared = self.store.clear_all().await.map_err(CoordinatorError::StoreUnavailable)?;
        warn!("Cleared all tasks: {} signalled, {} locks removed", signalled, locks_cleared);
        Ok(ClearReport { signalled, locks_cleared })
    }

    pub async fn stats(&self) -> Result<UsageStats, CoordinatorError> {
        self.store.stats().await.map_err(CoordinatorError::StoreUnavailable)
    }

    async fn execute(
        &self,
        job_id: &str,
        user_id: UserId,
        source: &InputSource,
        files: &JobFiles,
        cancel: &CancelHandle,
    ) -> Result<Finished, CoordinatorError> {
        self.store
            .append_log(user_id, UsageAction::Upload)
            .await
            .map_err(CoordinatorError::StoreUnavailable)?;

        let mut notifier = ThrottledNotifier::new(
            self.observer.clone(),
            user_id,
            self.config.task_name.as_str(),
            self.config.relay_interval,
            Instant::now(),
        );
        let (sink, progress) = ProgressSink::channel(ProgressSnapshot::new("Starting...", ProgressUnit::Bytes));
        let (done_tx, done_rx) = oneshot::channel();

        let sink = &sink;
        let work = async move {
            let outcome = self.stage_and_convert(job_id, source, files, sink, cancel).await;
            let _ = done_tx.send(());
            outcome
        };
        let relay = relay_progress(&mut notifier, progress, done_rx, self.config.relay_interval);
        let (outcome, ()) = tokio::join!(work, relay);

        if let Finished::Succeeded(video) = &outcome {
            // the job is past the point of no return; late cancels are ignored
            if let Err(e) = self.observer.deliver(user_id, &files.output, DELIVERY_CAPTION).await {
                warn!("Failed to deliver {} to user {}: {}", video.file_name, user_id, e);
                return Ok(Finished::failed(format!("delivery failed: {}", e)));
            }
        }
        Ok(outcome)
    }

    async fn stage_and_convert(
        &self,
        job_id: &str,
        source: &InputSource,
        files: &JobFiles,
        sink: &ProgressSink,
        cancel: &CancelHandle,
    ) -> Finished {
        if let InputSource::Url { url, expected_size } = source {
            match download_audio(&self.http, url, &files.input, *expected_size, sink, cancel).await {
                Ok(_) => {}
                Err(DownloadError::Cancelled) => return Finished::Cancelled,
                Err(e) => {
                    warn!("Download failed for job {}: {}", job_id, e);
                    return Finished::failed(e.to_string());
                }
            }
        }
        if cancel.is_cancelled() {
            return Finished::Cancelled;
        }
        if let Some(dir) = files.output.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                return Finished::failed(format!("failed to prepare work dir: {}", e));
            }
        }

        sink.start_phase("Processing Video...", ProgressUnit::Frames);
        let converter = self.converter.clone();
        let (input, output) = (files.input.clone(), files.output.clone());
        let (sink, cancel) = (sink.clone(), cancel.clone());
        let converted = tokio::task::spawn_blocking(move || converter.convert(&input, &output, &sink, &cancel)).await;

        match converted {
            Ok(Ok(())) => match tokio::fs::metadata(&files.output).await {
                Ok(meta) => {
                    info!("Job {} converted ({} bytes)", job_id, meta.len());
                    Finished::Succeeded(ConvertedVideo {
                        job_id: job_id.to_string(),
                        file_name: format!("{}.mp4", job_id),
                        size_bytes: meta.len(),
                    })
                }
                Err(e) => Finished::failed(format!("converter produced no output: {}", e)),
            },
            Ok(Err(ConvertError::Cancelled)) => Finished::Cancelled,
            Ok(Err(ConvertError::Failed(reason))) => {
                warn!("Job {} failed: {}", job_id, reason);
                Finished::failed(reason)
            }
            Err(e) => {
                error!("Conversion worker for job {} died: {}", job_id, e);
                Finished::failed(format!("conversion worker died: {}", e))
            }
        }
    }

    /// Remove the job's files, drop its cancel signal, release its lock and
    /// log the terminal action. Every step runs; the first store error wins.
    ///
    /// The signal and the lock are only dropped while they still belong to
    /// `job_id`: after a sweep or manual cancel another job may hold both.
    pub(crate) async fn teardown(
        &self,
        user_id: UserId,
        job_id: &str,
        files: &JobFiles,
        cancel: &CancelHandle,
        action: UsageAction,
    ) -> Result<(), CoordinatorError> {
        files.remove().await;
        // unregister first: once the lock is gone a new job may register
        self.registry.unregister(user_id, cancel);
        let released = self.store.release_owned(user_id, job_id).await;
        match &released {
            Ok(true) => {}
            Ok(false) => warn!("Lock for user {} no longer held by job {}", user_id, job_id),
            Err(e) => error!("Failed to release lock for user {}: {}", user_id, e),
        }
        let logged = self.store.append_log(user_id, action).await;
        if let Err(e) = &logged {
            error!("Failed to log {} for user {}: {}", action, user_id, e);
        }
        info!("Job for user {} finished: {}", user_id, action);
        released.and(logged).map_err(CoordinatorError::StoreUnavailable)
    }

    async fn send_final(&self, user_id: UserId, result: &Result<&JobOutcome, &CoordinatorError>) {
        let text = match result {
            Ok(JobOutcome::Succeeded(_)) => "✅ Conversion complete.".to_string(),
            Ok(JobOutcome::Failed { .. }) => "❌ Conversion failed.".to_string(),
            Ok(JobOutcome::Cancelled) => "⚠️ Task cancelled.".to_string(),
            Ok(JobOutcome::AlreadyRunning) => "⏳ Already processing. Use /cancel if stuck.".to_string(),
            Err(e) => format!("❌ Error: {}", e),
        };
        if let Err(e) = self.observer.render(user_id, &text, Controls::None).await {
            debug!("Final status for user {} not shown: {}", user_id, e);
        }
    }
}

/// A job that holds its user's lock and has not run yet.
///
/// Dropping it without calling [`AdmittedJob::run`] still tears it down.
pub struct AdmittedJob {
    coordinator: TaskCoordinator,
    job_id: String,
    user_id: UserId,
    source: InputSource,
    files: JobFiles,
    cancel: CancelHandle,
    guard: TeardownGuard,
}

impl AdmittedJob {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub async fn run(self) -> Result<JobOutcome, CoordinatorError> {
        let AdmittedJob { coordinator, job_id, user_id, source, files, cancel, guard } = self;

        let result = coordinator.execute(&job_id, user_id, &source, &files, &cancel).await;
        let action = match &result {
            Ok(finished) => finished.usage_action(),
            Err(_) => UsageAction::Failed,
        };
        let torn_down = guard.release(action).await;

        let result = match (result, torn_down) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(finished), Ok(())) => Ok(JobOutcome::from(finished)),
        };
        match &result {
            Ok(outcome) => coordinator.send_final(user_id, &Ok(outcome)).await,
            Err(e) => coordinator.send_final(user_id, &Err(e)).await,
        }
        result
    }
}

/// Forward the latest snapshot to the notifier on every tick until the
/// worker signals completion, then flush whatever the last tick missed.
async fn relay_progress(
    notifier: &mut ThrottledNotifier,
    progress: watch::Receiver<ProgressSnapshot>,
    mut done: oneshot::Receiver<()>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = &mut done => break,
            tick = ticker.tick() => {
                let snapshot = progress.borrow().clone();
                notifier.maybe_notify(&snapshot, tick).await;
            }
        }
    }
    let snapshot = progress.borrow().clone();
    notifier.flush(&snapshot, Instant::now()).await;
}
