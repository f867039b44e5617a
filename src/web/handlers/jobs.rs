use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Response,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::coordinator::{CancelOutcome, InputSource, JobRequest};
use crate::web::response::{fail, reply};
use crate::web::ApiResponse;
use crate::{AppContext, UserId};

pub fn jobs_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", post(submit_job))
        .route("/:user_id/cancel", post(cancel_job))
        .with_state(ctx)
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub user_id: UserId,
    pub audio_url: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: String,
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct CancelReply {
    pub outcome: CancelOutcome,
    pub message: &'static str,
}

// Admit synchronously, run in the background
async fn submit_job(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<SubmitJobRequest>,
) -> Response {
    if !(req.audio_url.starts_with("http://") || req.audio_url.starts_with("https://")) {
        return fail(StatusCode::BAD_REQUEST, "audio_url must be an http(s) URL");
    }
    info!(
        "Received {} from user {}",
        req.file_name.as_deref().unwrap_or("audio"),
        req.user_id
    );

    let request = JobRequest {
        user_id: req.user_id,
        source: InputSource::Url {
            url: req.audio_url,
            expected_size: req.file_size,
        },
    };
    match ctx.coordinator.admit(request).await {
        Ok(Some(job)) => {
            let submitted = SubmittedJob {
                job_id: job.job_id().to_string(),
                user_id: job.user_id(),
            };
            let user_id = submitted.user_id;
            tokio::spawn(async move {
                if let Err(e) = job.run().await {
                    error!("Job for user {} ended with error: {}", user_id, e);
                }
            });
            reply(StatusCode::ACCEPTED, ApiResponse::success(submitted))
        }
        Ok(None) => fail(StatusCode::CONFLICT, "Already processing. Use /cancel if stuck."),
        Err(e) => fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn cancel_job(
    State(ctx): State<Arc<AppContext>>,
    Path(user_id): Path<UserId>,
) -> Response {
    match ctx.coordinator.cancel(user_id).await {
        Ok(outcome) => {
            let message = match outcome {
                CancelOutcome::Signalled | CancelOutcome::LockCleared => {
                    "Tasks cleared. You can send a new file now."
                }
                CancelOutcome::NothingToCancel => "No active tasks.",
            };
            reply(StatusCode::OK, ApiResponse::success(CancelReply { outcome, message }))
        }
        Err(e) => {
            error!("Failed to cancel job for user {}: {}", user_id, e);
            fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
