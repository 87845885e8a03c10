use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use super::validation::SubmissionValidationError;
use crate::queue::QueueError;
use crate::worker::TaskError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload exceeds limit of {0} bytes")]
    PayloadTooLarge(u64),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("detection failed: {0}")]
    Detection(#[from] TaskError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Detection(TaskError::Decode(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Detection(TaskError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Detection(TaskError::Detect(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Detection(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::Detection(err) => err.code(),
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(value: QueueError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl From<SubmissionValidationError> for ApiError {
    fn from(value: SubmissionValidationError) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}
