//! Gateway error taxonomy.
//!
//! This is the canonical error type used across the request pipeline.
//! Adapters map it onto their own surface (HTTP status codes and OpenAI
//! error bodies, CLI exit codes).

use std::time::Duration;

use thiserror::Error;

use crate::ports::{BackendError, BackendErrorCode};

/// OpenAI error `type` vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    InvalidRequest,
    Authentication,
    RateLimit,
    Api,
    NotFound,
    Permission,
}

impl ErrorType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request_error",
            Self::Authentication => "authentication_error",
            Self::RateLimit => "rate_limit_error",
            Self::Api => "api_error",
            Self::NotFound => "not_found_error",
            Self::Permission => "permission_error",
        }
    }
}

/// A client error found while parsing or validating a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    /// Offending field path, e.g. `messages[3].tool_call_id`.
    pub param: Option<String>,
    pub code: Option<&'static str>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            param: None,
            code: None,
        }
    }

    /// Error tied to a field path; the path is prefixed to the message.
    pub fn at(param: impl Into<String>, message: impl Into<String>) -> Self {
        let param = param.into();
        Self {
            message: format!("{param}: {}", message.into()),
            param: Some(param),
            code: None,
        }
    }

    #[must_use]
    pub const fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

/// Errors produced anywhere in the request pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed body, schema violation, or tool-call correlation failure.
    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),

    #[error("Missing or invalid bearer token")]
    Unauthenticated,

    /// A rate-limit gate denied admission.
    #[error("Rate limit exceeded ({scope}); retry after {retry_after_ms} ms")]
    RateLimited { scope: String, retry_after_ms: u64 },

    /// The requested model is not in the pool, even after a forced refresh.
    #[error("Model '{0}' is not available")]
    ModelUnavailable(String),

    #[error("Chat backend is currently unavailable")]
    BackendUnavailable,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("Request timed out after {} s", .0.as_secs())]
    Timeout(Duration),

    /// Required tool mode was requested but the model produced no tool call.
    #[error("Model did not produce a tool call although one was required")]
    ToolCallRequired,

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Request was cancelled by the client")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Unauthenticated => 401,
            Self::RateLimited { .. } => 429,
            Self::ModelUnavailable(_) | Self::BackendUnavailable | Self::ShuttingDown => 503,
            Self::Backend(err) => match err.code {
                BackendErrorCode::NotFound => 404,
                BackendErrorCode::NoPermissions => 403,
                BackendErrorCode::ContextLengthExceeded => 400,
                BackendErrorCode::Blocked | BackendErrorCode::Other => 502,
            },
            Self::PayloadTooLarge { .. } => 413,
            Self::Timeout(_) => 408,
            Self::ToolCallRequired => 502,
            Self::Cancelled => 499,
            Self::Internal(_) => 500,
        }
    }

    /// OpenAI error `type`.
    #[must_use]
    pub const fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest(_) | Self::PayloadTooLarge { .. } | Self::Timeout(_) => {
                ErrorType::InvalidRequest
            }
            Self::Unauthenticated => ErrorType::Authentication,
            Self::RateLimited { .. } => ErrorType::RateLimit,
            Self::Backend(err) => match err.code {
                BackendErrorCode::NotFound => ErrorType::NotFound,
                BackendErrorCode::NoPermissions => ErrorType::Permission,
                BackendErrorCode::ContextLengthExceeded => ErrorType::InvalidRequest,
                BackendErrorCode::Blocked | BackendErrorCode::Other => ErrorType::Api,
            },
            Self::ModelUnavailable(_)
            | Self::BackendUnavailable
            | Self::ToolCallRequired
            | Self::ShuttingDown
            | Self::Cancelled
            | Self::Internal(_) => ErrorType::Api,
        }
    }

    /// Machine readable error code, when one applies.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidRequest(err) => err.code,
            Self::Unauthenticated => Some("invalid_api_key"),
            Self::RateLimited { .. } => Some("rate_limit_exceeded"),
            Self::ModelUnavailable(_) => Some("model_not_available"),
            Self::BackendUnavailable => Some("backend_unavailable"),
            Self::Backend(err) => match err.code {
                BackendErrorCode::NotFound => Some("model_not_found"),
                BackendErrorCode::NoPermissions => Some("no_permissions"),
                BackendErrorCode::Blocked => Some("blocked"),
                BackendErrorCode::ContextLengthExceeded => Some("context_length_exceeded"),
                BackendErrorCode::Other => Some("backend_error"),
            },
            Self::PayloadTooLarge { .. } => Some("payload_too_large"),
            Self::Timeout(_) => Some("request_timeout"),
            Self::ToolCallRequired => Some("tool_call_required"),
            Self::ShuttingDown => Some("shutting_down"),
            Self::Cancelled => Some("cancelled"),
            Self::Internal(_) => None,
        }
    }

    /// Offending field path, for client errors.
    #[must_use]
    pub fn param(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest(err) => err.param.as_deref(),
            Self::ModelUnavailable(_) => Some("model"),
            _ => None,
        }
    }

    /// Suggested wait before retrying, for admission errors.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Whether the connection should be closed after responding.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        let cases = [
            (BackendErrorCode::NoPermissions, 403, "permission_error"),
            (BackendErrorCode::NotFound, 404, "not_found_error"),
            (BackendErrorCode::ContextLengthExceeded, 400, "invalid_request_error"),
            (BackendErrorCode::Blocked, 502, "api_error"),
            (BackendErrorCode::Other, 502, "api_error"),
        ];
        for (code, status, ty) in cases {
            let err = GatewayError::from(BackendError::new(code, "boom"));
            assert_eq!(err.status_code(), status, "{code:?}");
            assert_eq!(err.error_type().as_str(), ty, "{code:?}");
        }
    }

    #[test]
    fn test_validation_error_carries_param() {
        let err: GatewayError = ValidationError::at("messages[2].tool_call_id", "is required").into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.param(), Some("messages[2].tool_call_id"));
        assert_eq!(err.to_string(), "messages[2].tool_call_id: is required");
    }

    #[test]
    fn test_transport_errors() {
        assert_eq!(GatewayError::PayloadTooLarge { limit: 10 }.status_code(), 413);
        assert!(GatewayError::PayloadTooLarge { limit: 10 }.closes_connection());
        assert_eq!(GatewayError::Timeout(Duration::from_secs(5)).status_code(), 408);
        let limited = GatewayError::RateLimited {
            scope: "per_minute".to_string(),
            retry_after_ms: 1500,
        };
        assert_eq!(limited.status_code(), 429);
        assert_eq!(limited.retry_after_ms(), Some(1500));
    }
}
