use crate::engine::EngineError;
use crate::pipeline::PipelineError;
use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_store::StoreError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, ApiError>;

/// Error returned by HTTP handlers, rendered as `{success: false, error}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

/// JSON request body whose rejections render like every other `ApiError`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateStudentId(_) => ApiError::BadRequest("Student ID already exists".into()),
            StoreError::DuplicateEmail(_) => ApiError::BadRequest("Email already registered".into()),
            StoreError::InvalidTimetable(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ChannelClosed => ApiError::Unavailable("Face recognition models not available".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Engine(e) => e.into(),
            PipelineError::Store(e) => e.into(),
            PipelineError::EnrollEmbed { .. } => ApiError::Internal(err.to_string()),
            PipelineError::Image(_)
            | PipelineError::Threshold(_)
            | PipelineError::ImageCount(_)
            | PipelineError::EnrollImage { .. }
            | PipelineError::EnrollFaceCount { .. } => ApiError::BadRequest(err.to_string()),
        }
    }
}
