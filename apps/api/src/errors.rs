use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    /// Always carries `details` so a 400 tells the caller what to fix.
    #[error("Validation error: {message} ({details})")]
    Validation { message: String, details: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Template merge failure. The cause is logged, never returned.
    #[error("Fill error: {0}")]
    Fill(String),

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Fill(_) | AppError::ConversionFailed(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// JSON error body, stashed in the response extensions so the timing
/// middleware can stamp `processingTimeMs` into it.
#[derive(Debug, Clone)]
pub struct ErrorEnvelope(pub Value);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match &self {
            AppError::Validation { message, .. } => ("VALIDATION_ERROR", message.clone()),
            AppError::NotFound(msg) => ("NOT_FOUND", msg.clone()),
            AppError::PayloadTooLarge(msg) => ("PAYLOAD_TOO_LARGE", msg.clone()),
            AppError::RateLimited { .. } => (
                "RATE_LIMITED",
                "Too many requests. Please try again later.".to_string(),
            ),
            AppError::Fill(cause) => {
                tracing::error!("Document fill error: {cause}");
                (
                    "GENERATION_FAILED",
                    "The document could not be generated from this template".to_string(),
                )
            }
            AppError::ConversionFailed(reason) => {
                tracing::error!("Conversion failed: {reason}");
                (
                    "CONVERSION_FAILED",
                    "The document could not be converted to the requested format".to_string(),
                )
            }
            AppError::Upstream(msg) => {
                tracing::error!("Upstream error: {msg}");
                (
                    "UPSTREAM_ERROR",
                    "An upstream service error occurred".to_string(),
                )
            }
            AppError::Unavailable(msg) => ("SERVICE_UNAVAILABLE", msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let AppError::Validation { details, .. } = &self {
            error["details"] = json!(details);
        }
        if let AppError::RateLimited { retry_after_secs } = &self {
            error["retryAfter"] = json!(retry_after_secs);
        }

        let body = json!({
            "success": false,
            "error": error,
        });
        let mut response = (status, Json(body.clone())).into_response();
        if let AppError::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response.extensions_mut().insert(ErrorEnvelope(body));
        response
    }
}
