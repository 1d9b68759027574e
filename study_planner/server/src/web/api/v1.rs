use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Generic JSON error body of the v1 API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServerErrorResponse {
    /// Human readable description of what went wrong
    pub error: String,
}

impl ServerErrorResponse {
    pub fn new(error: String) -> Self {
        Self { error }
    }

    /// A complete response with the given status.
    pub fn response(status: StatusCode, error: impl Into<String>) -> Response {
        (status, Json(Self::new(error.into()))).into_response()
    }

    pub fn internal(error: impl Into<String>) -> Response {
        Self::response(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}
