//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use http_body_util::BodyExt;
use lmbridge_core::testing::ScriptedBackend;
use lmbridge_core::GatewaySettings;
use lmbridge_proxy::Gateway;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const TOKEN: &str = "test-token-0123456789abcdef";

pub fn settings() -> GatewaySettings {
    GatewaySettings {
        api_key: Some(TOKEN.to_string()),
        ..GatewaySettings::default()
    }
}

/// Backend offering one primary and one small fallback model.
pub fn backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::with_models(vec![
        ScriptedBackend::model("gpt-4o", 128_000),
        ScriptedBackend::model("small-model", 4096),
    ]))
}

pub fn gateway(backend: &Arc<ScriptedBackend>) -> Gateway {
    gateway_with(backend, settings(), CancellationToken::new())
}

pub fn gateway_with(
    backend: &Arc<ScriptedBackend>,
    settings: GatewaySettings,
    shutdown: CancellationToken,
) -> Gateway {
    Gateway::new(settings, Arc::clone(backend) as _, shutdown).expect("valid settings")
}

pub fn chat(body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/v1/chat/completions")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn send(gateway: &Gateway, request: Request<Body>) -> Response<Body> {
    gateway.router().oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Payloads of the `data:` lines of an SSE body, in order.
pub fn sse_data(text: &str) -> Vec<String> {
    text.split("\n\n")
        .filter_map(|event| {
            event
                .lines()
                .find_map(|line| line.strip_prefix("data: "))
                .map(str::to_string)
        })
        .collect()
}

pub fn user(text: &str) -> Value {
    serde_json::json!({"role": "user", "content": text})
}
