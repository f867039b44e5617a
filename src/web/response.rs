use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Shorthand for handlers: a status code plus the JSON envelope.
pub(crate) fn reply<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}

pub(crate) fn fail(status: StatusCode, error: impl Into<String>) -> Response {
    reply(status, ApiResponse::error(error))
}
