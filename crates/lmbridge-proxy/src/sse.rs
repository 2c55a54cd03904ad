//! Server-sent event framing for streamed completions.

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::Stream;
use lmbridge_core::GatewayError;
use serde::Serialize;
use tracing::error;

use crate::error::ErrorResponse;

pub const DONE: &str = "data: [DONE]\n\n";

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        error!("Failed to serialize SSE payload: {e}");
        "{}".to_string()
    })
}

/// `data: {json}\n\n`
pub fn data_frame<T: Serialize>(value: &T) -> Bytes {
    Bytes::from(format!("data: {}\n\n", to_json(value)))
}

/// `event: error` frame carrying the usual error body.
pub fn error_frame(err: &GatewayError) -> Bytes {
    Bytes::from(format!(
        "event: error\ndata: {}\n\n",
        to_json(&ErrorResponse::from(err))
    ))
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE.as_bytes())
}

/// Wrap a frame stream in an event-stream response.
pub fn sse_response<S>(frames: S) -> Response
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames() {
        assert_eq!(data_frame(&serde_json::json!({"a": 1})), "data: {\"a\":1}\n\n");
        assert_eq!(done_frame(), "data: [DONE]\n\n");

        let frame = error_frame(&GatewayError::ToolCallRequired);
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: error\ndata: "));
        assert!(text.contains("tool_call_required"));
        assert!(text.ends_with("\n\n"));
    }
}
