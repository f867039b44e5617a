use axum::Router;
use std::sync::Arc;
use crate::AppContext;

pub mod admin;
pub mod health;
pub mod jobs;


pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .merge(health::health_router(ctx.clone()))
        .nest("/jobs", jobs::jobs_router(ctx.clone()))
        .nest("/admin", admin::admin_router(ctx))
}
