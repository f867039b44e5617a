use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::error;

use crate::web::response::{fail, reply};
use crate::web::ApiResponse;
use crate::AppContext;

const ALIVE: &str = "Bot is running!";

pub fn health_router(ctx: Arc<AppContext>) -> Router {
    // GET routes answer HEAD as well
    Router::new()
        .route("/", get(alive))
        .route("/health", get(alive))
        .route("/status", get(status))
        .with_state(ctx)
}

async fn alive() -> &'static str {
    ALIVE
}

async fn status(State(ctx): State<Arc<AppContext>>) -> Response {
    match ctx.coordinator.stats().await {
        Ok(stats) => reply(StatusCode::OK, ApiResponse::success(stats)),
        Err(e) => {
            error!("Failed to load stats: {}", e);
            fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
