//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vidq_queue::QueueError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The analyzer rejected the input outright.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limited")]
    RateLimited,

    /// The job store could not be reached; the caller may retry.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) | ApiError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::NotFound(_) => Some("not_found"),
            ApiError::Validation(_) => Some("validation"),
            ApiError::InvalidInput(_) => Some("invalid_input"),
            ApiError::RateLimited => Some("rate_limited"),
            ApiError::StoreUnavailable(_) => Some("store_unavailable"),
            ApiError::BadRequest(_) | ApiError::Internal(_) => None,
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited | ApiError::StoreUnavailable(_))
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        if let QueueError::JobNotFound(id) = &e {
            return ApiError::NotFound(format!("Job {} not found", id));
        }
        if e.is_retryable() {
            ApiError::StoreUnavailable(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::Validation(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let production = std::env::var("ENVIRONMENT").unwrap_or_default() == "production";
        let message = match &self {
            ApiError::Internal(_) if production => "An internal error occurred".to_string(),
            ApiError::StoreUnavailable(_) if production => {
                "Service temporarily unavailable, please retry".to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            status: "error",
            message,
            code: self.code(),
        };

        let mut response = (status, Json(body)).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidq_models::JobId;

    #[test]
    fn test_queue_errors_map_to_caller_facing_errors() {
        let missing: ApiError = QueueError::JobNotFound(JobId::from("abc")).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let outage: ApiError = QueueError::unavailable("connection refused").into();
        assert_eq!(outage.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(outage.code(), Some("store_unavailable"));
        assert!(outage.is_retryable());
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::bad_request("url is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Bad request: url is required");
        assert!(body.get("code").is_none());
    }
}
