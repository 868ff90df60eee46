//! HTTP-facing errors for the webhook listener.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use peerlog_core::pipeline::PipelineError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing or wrong token.
    #[error("unauthorized")]
    Unauthorized,

    /// The body is not an event we can decode.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The service is draining and no longer accepts events.
    #[error("service is shutting down")]
    ShuttingDown,
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Pipeline(_) => StatusCode::BAD_REQUEST,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Unauthorized => json!({ "error": "unauthorized" }),
            Self::Pipeline(e) => json!({
                "message": "Invalid event payload",
                "error": e.to_string(),
                "error_type": e.error_type(),
            }),
            Self::ShuttingDown => json!({ "error": "shutting_down" }),
        };
        (self.status(), Json(body)).into_response()
    }
}
