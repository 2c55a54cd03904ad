//! Loopback-only CORS.
//!
//! Only `http(s)://localhost[:port]` and `http(s)://127.0.0.1[:port]` are
//! echoed back. Any other origin gets [`FALLBACK_ORIGIN`], which a remote page
//! can never match.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;

pub const FALLBACK_ORIGIN: &str = "http://localhost";

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Authorization, Content-Type, Accept";
const MAX_AGE_SECS: &str = "600";

/// Whether `origin` is a loopback web origin.
#[must_use]
pub fn is_local_origin(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (rest, None),
    };
    let port_ok = port.is_none_or(|p| {
        (1..=5).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit())
    });
    matches!(host, "localhost" | "127.0.0.1") && port_ok
}

fn allowed_origin(headers: &HeaderMap) -> HeaderValue {
    headers
        .get(header::ORIGIN)
        .filter(|v| v.to_str().is_ok_and(is_local_origin))
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(FALLBACK_ORIGIN))
}

fn apply(headers: &mut HeaderMap, origin: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
}

/// CORS middleware. Answers preflight itself with 204.
pub async fn cors(req: Request, next: Next) -> Response {
    let origin = allowed_origin(req.headers());

    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();
        apply(headers, origin);
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(MAX_AGE_SECS),
        );
        return response;
    }

    let mut response = next.run(req).await;
    apply(response.headers_mut(), origin);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_origins() {
        for origin in [
            "http://localhost",
            "https://localhost:3000",
            "http://127.0.0.1:8080",
            "https://127.0.0.1",
        ] {
            assert!(is_local_origin(origin), "{origin}");
        }
    }

    #[test]
    fn test_remote_origins_rejected() {
        for origin in [
            "http://evil.com",
            "http://localhost.evil.com",
            "http://127.0.0.1.nip.io",
            "ftp://localhost",
            "http://localhost:123456",
            "http://localhost:",
            "null",
        ] {
            assert!(!is_local_origin(origin), "{origin}");
        }
    }

    #[test]
    fn test_fallback_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://example.com"));
        assert_eq!(allowed_origin(&headers), FALLBACK_ORIGIN);

        headers.insert(header::ORIGIN, HeaderValue::from_static("http://localhost:5173"));
        assert_eq!(allowed_origin(&headers), "http://localhost:5173");
    }
}
