//! API error types with structured JSON responses.
//!
//! Every failure leaves the front door as
//! `{"error": {"code": "...", "message": "..."}}` with a stable code.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::admission::AdmissionError;
use crate::engine::{EngineError, ValidationError};
use crate::lifecycle::LifecycleError;
use crate::status_store::StatusError;

/// Seconds a client is asked to back off after `CAPACITY_EXCEEDED`.
const CAPACITY_RETRY_AFTER_SECS: u64 = 2;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Capacity exceeded: {detail}")]
    CapacityExceeded { retry_after: u64, detail: String },
    #[error("Engine timeout: {0}")]
    EngineTimeout(String),
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Lifecycle unavailable: {0}")]
    LifecycleUnavailable(String),
    #[error("Restart already in progress")]
    RestartInProgress,
    #[error("Shutting down")]
    ShuttingDown,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            ApiError::EngineTimeout(_) => "ENGINE_TIMEOUT",
            ApiError::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            ApiError::LifecycleUnavailable(_) => "LIFECYCLE_UNAVAILABLE",
            ApiError::RestartInProgress => "RESTART_IN_PROGRESS",
            ApiError::ShuttingDown => "SHUTTING_DOWN",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::EngineTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::EngineUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::LifecycleUnavailable(_) | ApiError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::RestartInProgress => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                "An internal error occurred".to_string()
            }
            ApiError::InvalidRequest(detail)
            | ApiError::EngineTimeout(detail)
            | ApiError::EngineUnavailable(detail)
            | ApiError::LifecycleUnavailable(detail) => detail.clone(),
            ApiError::CapacityExceeded { detail, .. } => detail.clone(),
            ApiError::RestartInProgress => "A restart is already in progress".to_string(),
            ApiError::ShuttingDown => "The service is shutting down".to_string(),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let ApiError::CapacityExceeded { retry_after, .. } = &self {
            if let Ok(val) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::CapacityExceeded { .. } => ApiError::CapacityExceeded {
                retry_after: CAPACITY_RETRY_AFTER_SECS,
                detail: err.to_string(),
            },
            AdmissionError::Closed => ApiError::ShuttingDown,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout(_) => ApiError::EngineTimeout(err.to_string()),
            _ => ApiError::EngineUnavailable(err.to_string()),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Unavailable(e) => ApiError::LifecycleUnavailable(e.to_string()),
            LifecycleError::RestartInProgress => ApiError::RestartInProgress,
            LifecycleError::InvalidRequest(detail) => ApiError::InvalidRequest(detail),
        }
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
