use axum::{
    extract::{Json, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::response::{fail, reply};
use crate::web::ApiResponse;
use crate::AppContext;

pub fn admin_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/users", get(users))
        .route("/stats", get(stats))
        .route("/broadcast", post(broadcast))
        .route("/clear-all", post(clear_all))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_owner))
        .with_state(ctx)
}

/// Only the owner's bearer token gets through; without a configured token the
/// admin routes are closed.
async fn require_owner(
    State(ctx): State<Arc<AppContext>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = ctx.owner_token.as_deref() else {
        return fail(StatusCode::FORBIDDEN, "Admin routes are disabled");
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented != Some(expected) {
        warn!("Rejected admin request to {}", req.uri().path());
        return fail(StatusCode::UNAUTHORIZED, "Invalid owner token");
    }
    next.run(req).await
}

#[derive(Debug, Serialize)]
struct UserCount {
    unique_users: u64,
}

async fn users(State(ctx): State<Arc<AppContext>>) -> Response {
    match ctx.coordinator.stats().await {
        Ok(stats) => reply(StatusCode::OK, ApiResponse::success(UserCount { unique_users: stats.unique_users })),
        Err(e) => fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn stats(State(ctx): State<Arc<AppContext>>) -> Response {
    match ctx.coordinator.stats().await {
        Ok(stats) => reply(StatusCode::OK, ApiResponse::success(stats)),
        Err(e) => fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    text: String,
}

async fn broadcast(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<BroadcastRequest>,
) -> Response {
    if req.text.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "Nothing to broadcast");
    }
    match ctx.broadcaster.broadcast(&req.text).await {
        Ok(report) => reply(StatusCode::OK, ApiResponse::success(report)),
        Err(e) => {
            error!("Broadcast failed: {}", e);
            fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

// Emergency reset
async fn clear_all(State(ctx): State<Arc<AppContext>>) -> Response {
    match ctx.coordinator.clear_all().await {
        Ok(report) => reply(StatusCode::OK, ApiResponse::success(report)),
        Err(e) => fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}
