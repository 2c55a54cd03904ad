//! Integration tests for bearer authentication and loopback CORS.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use common::{TOKEN, backend, body_json, gateway, gateway_with, send, settings};
use tokio_util::sync::CancellationToken;

fn unauthenticated(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_requires_no_auth() {
    let gateway = gateway(&backend());
    let response = send(&gateway, unauthenticated("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let gateway = gateway(&backend());
    let response = send(&gateway, unauthenticated("/v1/models")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "authentication_error");
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let gateway = gateway(&backend());
    let request = Request::builder()
        .uri("/v1/models")
        .header(header::AUTHORIZATION, "Bearer not-the-token")
        .body(Body::empty())
        .unwrap();
    let response = send(&gateway, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(gateway.state().stats.snapshot().unauthenticated, 1);
}

#[tokio::test]
async fn test_valid_token_is_accepted() {
    let gateway = gateway(&backend());
    let request = Request::builder()
        .uri("/v1/models")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = send(&gateway, request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_lowercase_scheme_is_accepted() {
    let gateway = gateway(&backend());
    let request = Request::builder()
        .uri("/v1/models")
        .header(header::AUTHORIZATION, format!("bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = send(&gateway, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(gateway.state().stats.snapshot().unauthenticated, 0);
}

#[tokio::test]
async fn test_unauthenticated_budget_is_separate() {
    let mut settings = settings();
    settings.rate_limits.unauthenticated_per_minute = 2;
    let gateway = gateway_with(&backend(), settings, CancellationToken::new());

    for _ in 0..2 {
        let response = send(&gateway, unauthenticated("/status")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = send(&gateway, unauthenticated("/status")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(body_json(response).await["error"]["type"], "rate_limit_error");

    // The authenticated budget is untouched.
    let response = send(&gateway, common::get("/status")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_preflight_from_local_origin() {
    let gateway = gateway(&backend());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/v1/chat/completions")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = send(&gateway, request).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:5173");
    let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
    assert!(methods.contains("POST"));
    let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS].to_str().unwrap();
    assert!(allowed.contains("Authorization"));
}

#[tokio::test]
async fn test_remote_origin_gets_fallback() {
    let gateway = gateway(&backend());
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://attacker.example")
        .body(Body::empty())
        .unwrap();
    let response = send(&gateway, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost"
    );
}

#[tokio::test]
async fn test_error_responses_carry_cors_headers() {
    let gateway = gateway(&backend());
    let request = Request::builder()
        .uri("/v1/models")
        .header(header::ORIGIN, "http://127.0.0.1:3000")
        .body(Body::empty())
        .unwrap();
    let response = send(&gateway, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://127.0.0.1:3000"
    );
}
