//! Upstream failure mapping.

use lmbridge_core::{BackendError, BackendErrorCode};
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while constructing the upstream client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Invalid upstream URL '{0}'")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Longest upstream error body quoted in a message.
const MAX_QUOTED_BODY: usize = 512;

/// Map a non-success upstream status and its body to a typed backend error.
pub fn map_status(status: StatusCode, body: &str) -> BackendError {
    let message = upstream_message(body);
    let code = match status.as_u16() {
        404 => BackendErrorCode::NotFound,
        401 | 403 => BackendErrorCode::NoPermissions,
        429 => BackendErrorCode::Blocked,
        400 | 413 if mentions_context(&message) => BackendErrorCode::ContextLengthExceeded,
        _ => BackendErrorCode::Other,
    };
    BackendError::new(code, format!("upstream returned {status}: {message}"))
}

/// Map a transport failure (connect, TLS, reset).
pub fn map_transport(err: &reqwest::Error) -> BackendError {
    if err.is_connect() {
        BackendError::other(format!("upstream unreachable: {err}"))
    } else {
        BackendError::other(format!("upstream request failed: {err}"))
    }
}

/// The `error.message` of an OpenAI-style error body, else the body itself.
fn upstream_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .and_then(serde_json::Value::as_str)
        })
        .unwrap_or(body)
        .trim();

    if message.len() > MAX_QUOTED_BODY {
        let mut end = MAX_QUOTED_BODY;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &message[..end])
    } else {
        message.to_string()
    }
}

fn mentions_context(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("context") || lower.contains("too many tokens") || lower.contains("n_ctx")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(map_status(StatusCode::NOT_FOUND, "").code, BackendErrorCode::NotFound);
        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, "").code,
            BackendErrorCode::NoPermissions
        );
        assert_eq!(map_status(StatusCode::FORBIDDEN, "").code, BackendErrorCode::NoPermissions);
        assert_eq!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "").code,
            BackendErrorCode::Blocked
        );
        assert_eq!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, "boom").code,
            BackendErrorCode::Other
        );
    }

    #[test]
    fn test_context_overflow_is_recognised() {
        let body = r#"{"error":{"message":"the request exceeds the available context size","type":"invalid_request_error"}}"#;
        let err = map_status(StatusCode::BAD_REQUEST, body);
        assert_eq!(err.code, BackendErrorCode::ContextLengthExceeded);
        assert!(err.message.contains("exceeds the available context size"));
    }

    #[test]
    fn test_plain_bad_request_is_other() {
        let err = map_status(StatusCode::BAD_REQUEST, "missing field `model`");
        assert_eq!(err.code, BackendErrorCode::Other);
        assert!(err.message.contains("missing field"));
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "é".repeat(600);
        let err = map_status(StatusCode::BAD_GATEWAY, &body);
        assert!(err.message.ends_with("..."));
        assert!(err.message.len() < 600);
    }
}
