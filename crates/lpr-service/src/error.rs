use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors carried inside a stage outcome.
///
/// None of these abort a pipeline run; stages absorb them at their boundary and
/// the run degrades to "no plate".
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A collaborator (capture, inference, OCR) was unavailable or failed
    #[error("{collaborator} failed: {message}")]
    Resource {
        collaborator: &'static str,
        message: String,
    },

    /// The task watchdog fired before the external driver reported completion
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Cancellation was observed at a checkpoint
    #[error("cancelled")]
    Cancelled,

    /// Tensor output did not match the expected layout
    #[error("malformed tensor: {0}")]
    MalformedTensor(String),

    /// Caller supplied input the pipeline cannot work with
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    pub fn resource(collaborator: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Resource {
            collaborator,
            message: err.to_string(),
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Resource { .. } => "resource",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Cancelled => "cancelled",
            PipelineError::MalformedTensor(_) => "malformed_tensor",
            PipelineError::InvalidInput(_) => "invalid_input",
        }
    }
}

/// HTTP-facing error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}
