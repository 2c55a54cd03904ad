//! OpenAI-shaped error responses.
//!
//! Every failure found before response headers are written leaves through
//! [`ApiError`]. Failures found mid-stream are framed by [`crate::sse`]
//! using the same [`ErrorResponse`] body.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use lmbridge_core::{GatewayError, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// `{"error": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl From<&GatewayError> for ErrorResponse {
    fn from(err: &GatewayError) -> Self {
        Self {
            error: ErrorDetail {
                message: err.to_string(),
                error_type: err.error_type().as_str().to_string(),
                code: err.code().map(str::to_string),
                param: err.param().map(str::to_string),
            },
        }
    }
}

/// HTTP face of a [`GatewayError`].
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(GatewayError::InvalidRequest(err))
    }
}

/// `Retry-After` is in whole seconds; never advertise zero.
fn retry_after_secs(ms: u64) -> u64 {
    ms.div_ceil(1000).max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        debug!(status = status.as_u16(), error = %self.0, "Responding with error");

        let mut response = (status, Json(ErrorResponse::from(&self.0))).into_response();
        let headers = response.headers_mut();

        if let Some(ms) = self.0.retry_after_ms()
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs(ms).to_string())
        {
            headers.insert(header::RETRY_AFTER, value);
        }
        if matches!(self.0, GatewayError::Unauthenticated) {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        if self.0.closes_connection() {
            headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(0), 1);
        assert_eq!(retry_after_secs(1000), 1);
        assert_eq!(retry_after_secs(1001), 2);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError(GatewayError::RateLimited {
            scope: "burst".to_string(),
            retry_after_ms: 2500,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }

    #[test]
    fn test_payload_too_large_closes_connection() {
        let response = ApiError(GatewayError::PayloadTooLarge { limit: 1024 }).into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }

    #[test]
    fn test_error_body_shape() {
        let err = GatewayError::from(ValidationError::at("messages[1].role", "unknown role"));
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["param"], "messages[1].role");
        assert!(body["error"].get("code").is_none());
    }

    #[test]
    fn test_cancelled_uses_client_closed_status() {
        let response = ApiError(GatewayError::Cancelled).into_response();
        assert_eq!(response.status().as_u16(), 499);
    }
}
