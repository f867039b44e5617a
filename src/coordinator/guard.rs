use tracing::{error, warn};

use super::{CancelHandle, CoordinatorError, JobFiles, TaskCoordinator};
use crate::storage::task::UsageAction;
use crate::UserId;

/// Runs a job's teardown exactly once.
///
/// The normal path awaits [`TeardownGuard::release`]. If the job future is
/// dropped or panics first, `Drop` signals the orphaned worker and spawns the
/// same teardown on the current runtime.
pub(crate) struct TeardownGuard {
    coordinator: TaskCoordinator,
    user_id: UserId,
    job_id: String,
    files: JobFiles,
    cancel: CancelHandle,
    armed: bool,
}

impl TeardownGuard {
    pub(crate) fn new(
        coordinator: TaskCoordinator,
        user_id: UserId,
        job_id: String,
        files: JobFiles,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            coordinator,
            user_id,
            job_id,
            files,
            cancel,
            armed: true,
        }
    }

    pub(crate) async fn release(mut self, action: UsageAction) -> Result<(), CoordinatorError> {
        self.armed = false;
        self.coordinator
            .teardown(self.user_id, &self.job_id, &self.files, &self.cancel, action)
            .await
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Job for user {} abandoned before teardown", self.user_id);
        let action = if self.cancel.is_cancelled() {
            UsageAction::Cancelled
        } else {
            UsageAction::Failed
        };
        self.cancel.cancel();

        let coordinator = self.coordinator.clone();
        let (user_id, job_id) = (self.user_id, self.job_id.clone());
        let (files, cancel) = (self.files.clone(), self.cancel.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = coordinator.teardown(user_id, &job_id, &files, &cancel, action).await {
                        error!("Background teardown for user {} failed: {}", user_id, e);
                    }
                });
            }
            Err(_) => {
                coordinator.registry.unregister(user_id, &cancel);
                files.remove_blocking();
                error!("No runtime to release lock for user {}; left to the stale lock sweeper", user_id);
            }
        }
    }
}
