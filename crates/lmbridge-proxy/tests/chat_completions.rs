//! Integration tests for non-streaming chat completions.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use common::{TOKEN, backend, body_json, chat, gateway, gateway_with, send, settings, user};
use lmbridge_core::testing::Script;
use lmbridge_core::{BackendError, BackendErrorCode, BackendFragment, BackendPart};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn weather_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "get_weather",
            "description": "Current weather for a city",
            "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
        }
    })
}

fn weather_call(id: &str) -> BackendFragment {
    BackendFragment::ToolCall {
        call_id: id.to_string(),
        name: "get_weather".to_string(),
        input: json!({"city": "Oslo"}),
    }
}

#[tokio::test]
async fn test_text_completion() {
    let backend = backend();
    backend.push(Script::Respond(vec![
        BackendFragment::Text("Hello".to_string()),
        BackendFragment::Text(" world".to_string()),
    ]));
    let gateway = gateway(&backend);

    let response = send(&gateway, chat(&json!({"model": "gpt-4o", "messages": [user("hi")]}))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gpt-4o");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello world");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["completion_tokens"], 3);

    let stats = gateway.state().stats.snapshot();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(backend.cancelled_calls(), 0);
}

#[tokio::test]
async fn test_system_message_reaches_backend_as_user_text() {
    let backend = backend();
    let gateway = gateway(&backend);
    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "system", "content": "Be brief."}, user("hi")]
    });
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model_id, "gpt-4o");
    assert!(
        requests[0]
            .messages
            .iter()
            .all(|m| m.role == lmbridge_core::BackendRole::User)
    );
}

fn image_request(model: &str, urls: &[&str]) -> Value {
    let mut content = vec![json!({"type": "text", "text": "What is this?"})];
    content.extend(
        urls.iter()
            .map(|url| json!({"type": "image_url", "image_url": {"url": url}})),
    );
    json!({"model": model, "messages": [{"role": "user", "content": content}]})
}

/// Parts of the last backend message of the first recorded request.
fn sent_parts(backend: &lmbridge_core::testing::ScriptedBackend) -> Vec<BackendPart> {
    let requests = backend.requests();
    requests[0].messages.last().unwrap().parts.clone()
}

const HELLO_PNG: &str = "data:image/png;base64,aGVsbG8=";

#[tokio::test]
async fn test_inline_image_reaches_vision_model_as_binary() {
    let backend = backend();
    backend.set_image_input(true);
    let mut settings = settings();
    settings.images.allowed_hosts = vec!["images.example.com".to_string()];
    let gateway = gateway_with(&backend, settings, CancellationToken::new());

    let body = image_request("gpt-4o", &[HELLO_PNG, "https://images.example.com/cat.png"]);
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let parts = sent_parts(&backend);
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], BackendPart::Text("What is this?".to_string()));
    match &parts[1] {
        BackendPart::Image { mime_type, data } => {
            assert_eq!(mime_type, "image/png");
            assert_eq!(&data[..], b"hello");
        }
        other => panic!("expected an image part, got {other:?}"),
    }
    assert_eq!(
        parts[2],
        BackendPart::Text("[image: https://images.example.com/cat.png]".to_string())
    );
}

#[tokio::test]
async fn test_image_for_non_vision_model_becomes_placeholder() {
    let backend = backend();
    backend.set_image_input(true);
    let gateway = gateway(&backend);

    let response = send(&gateway, chat(&image_request("small-model", &[HELLO_PNG]))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let parts = sent_parts(&backend);
    assert!(!parts.iter().any(|p| matches!(p, BackendPart::Image { .. })));
    assert_eq!(
        parts[1],
        BackendPart::Text("[image: image/png attachment not supported by this model]".to_string())
    );
}

#[tokio::test]
async fn test_image_without_backend_support_or_over_limit_is_dropped() {
    let backend = backend();
    let mut settings = settings();
    settings.images.max_image_bytes = 4;
    let gateway = gateway_with(&backend, settings, CancellationToken::new());

    let body = image_request("gpt-4o", &[HELLO_PNG, "https://elsewhere.test/x.png"]);
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let parts = sent_parts(&backend);
    assert_eq!(
        parts[1],
        BackendPart::Text("[image omitted: larger than 4 bytes]".to_string())
    );
    assert_eq!(
        parts[2],
        BackendPart::Text("[image omitted: host 'elsewhere.test' is not allowed]".to_string())
    );
}

#[tokio::test]
async fn test_tool_call_completion() {
    let backend = backend();
    backend.push(Script::Respond(vec![weather_call("call_1")]));
    let gateway = gateway(&backend);

    let body = json!({"model": "gpt-4o", "messages": [user("weather?")], "tools": [weather_tool()]});
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let choice = &body["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    let call = &choice["message"]["tool_calls"][0];
    assert_eq!(call["id"], "call_1");
    assert_eq!(call["type"], "function");
    assert_eq!(call["function"]["name"], "get_weather");
    let arguments: Value = serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(arguments, json!({"city": "Oslo"}));

    assert_eq!(backend.requests()[0].tools.len(), 1);
    let stats = gateway.state().stats.snapshot();
    assert_eq!(stats.with_tools, 1);
    assert_eq!(stats.tool_calls, 1);
}

#[tokio::test]
async fn test_legacy_function_call_completion() {
    let backend = backend();
    backend.push(Script::Respond(vec![weather_call("")]));
    let gateway = gateway(&backend);

    let body = json!({
        "model": "gpt-4o",
        "messages": [user("weather?")],
        "functions": [{"name": "get_weather", "parameters": {"type": "object"}}]
    });
    let body = body_json(send(&gateway, chat(&body)).await).await;
    let choice = &body["choices"][0];
    assert_eq!(choice["finish_reason"], "function_call");
    assert_eq!(choice["message"]["function_call"]["name"], "get_weather");
    assert!(choice["message"].get("tool_calls").is_none_or(Value::is_null));
}

#[tokio::test]
async fn test_tool_result_round_trip() {
    let backend = backend();
    let gateway = gateway(&backend);
    let body = json!({
        "model": "gpt-4o",
        "tools": [weather_tool()],
        "messages": [
            user("weather?"),
            {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}}
            ]},
            {"role": "tool", "tool_call_id": "call_1", "content": "12C and rain"}
        ]
    });
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let sent = &backend.requests()[0];
    assert!(sent.messages.last().unwrap().is_tool_results());
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let gateway = gateway(&backend());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/chat/completions")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&gateway, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_uncorrelated_tool_result_is_rejected() {
    let backend = backend();
    let gateway = gateway(&backend);
    let body = json!({
        "model": "gpt-4o",
        "messages": [user("hi"), {"role": "tool", "tool_call_id": "call_missing", "content": "42"}]
    });
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("no matching assistant tool call"), "{message}");
    assert_eq!(body["error"]["param"], "messages[1].tool_call_id");
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_oversized_body_closes_connection() {
    let mut settings = settings();
    settings.max_body_bytes = 1024;
    let backend = backend();
    let gateway = gateway_with(&backend, settings, CancellationToken::new());

    let body = json!({"model": "gpt-4o", "messages": [user(&"x".repeat(4096))]});
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()[header::CONNECTION], "close");
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_prompt_exceeding_context_is_rejected() {
    let backend = backend();
    let gateway = gateway(&backend);
    let body = json!({"model": "small-model", "messages": [user(&"word ".repeat(5000))]});

    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "context_length_exceeded");
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_backend_token_count_replaces_estimate() {
    let backend = backend();
    backend.set_token_count(Some(77));
    let gateway = gateway(&backend);

    let body = body_json(send(&gateway, chat(&json!({"model": "gpt-4o", "messages": [user("hi")]}))).await).await;
    assert_eq!(body["usage"]["prompt_tokens"], 77);
}

#[tokio::test]
async fn test_required_mode_without_tool_call_fails() {
    let backend = backend();
    backend.push(Script::Respond(vec![BackendFragment::Text("I'd rather chat".to_string())]));
    let gateway = gateway(&backend);

    let body = json!({
        "model": "gpt-4o",
        "messages": [user("weather?")],
        "tools": [weather_tool()],
        "tool_choice": "required"
    });
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"]["code"], "tool_call_required");
    assert_eq!(gateway.state().stats.snapshot().required_violations, 1);
}

#[tokio::test]
async fn test_tool_failure_retries_without_tools() {
    let backend = backend();
    backend.push(Script::Fail(BackendError::other("this model does not support tools")));
    backend.push(Script::Respond(vec![BackendFragment::Text("plain answer".to_string())]));
    let gateway = gateway(&backend);

    let body = json!({"model": "gpt-4o", "messages": [user("weather?")], "tools": [weather_tool()]});
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["choices"][0]["message"]["content"], "plain answer");

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert!(requests[1].tools.is_empty());
    assert_eq!(gateway.state().stats.snapshot().tool_fallbacks, 1);
}

#[tokio::test]
async fn test_required_mode_never_falls_back() {
    let backend = backend();
    backend.push(Script::Fail(BackendError::other("this model does not support tools")));
    let gateway = gateway(&backend);

    let body = json!({
        "model": "gpt-4o",
        "messages": [user("weather?")],
        "tools": [weather_tool()],
        "tool_choice": "required"
    });
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_unrelated_failure_is_not_retried() {
    let backend = backend();
    backend.push(Script::Fail(BackendError::new(
        BackendErrorCode::NoPermissions,
        "user declined access",
    )));
    let gateway = gateway(&backend);

    let body = json!({"model": "gpt-4o", "messages": [user("hi")], "tools": [weather_tool()]});
    let response = send(&gateway, chat(&body)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"]["type"], "permission_error");
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_backend_call() {
    let mut settings = settings();
    settings.request_timeout_secs = 1;
    let backend = backend();
    backend.push(Script::Hang);
    let gateway = gateway_with(&backend, settings, CancellationToken::new());

    let response = send(&gateway, chat(&json!({"model": "gpt-4o", "messages": [user("hi")]}))).await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body_json(response).await["error"]["code"], "request_timeout");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.cancelled_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_abort_cancels_backend_call() {
    let backend = backend();
    backend.push(Script::Hang);
    let gateway = gateway(&backend);

    let router = gateway.router();
    let in_flight = tokio::spawn(async move {
        use tower::ServiceExt;
        router
            .oneshot(chat(&json!({"model": "gpt-4o", "messages": [user("hi")]})))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.requests().len(), 1);
    assert_eq!(backend.cancelled_calls(), 0);

    in_flight.abort();
    assert!(in_flight.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.cancelled_calls(), 1);
    assert_eq!(gateway.state().admission.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_answers_in_flight_request() {
    let backend = backend();
    backend.push(Script::Hang);
    let shutdown = CancellationToken::new();
    let gateway = gateway_with(&backend, settings(), shutdown.clone());

    let router = gateway.router();
    let in_flight = tokio::spawn(async move {
        use tower::ServiceExt;
        router
            .oneshot(chat(&json!({"model": "gpt-4o", "messages": [user("hi")]})))
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.requests().len(), 1);
    shutdown.cancel();

    let response = in_flight.await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"]["code"], "shutting_down");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.cancelled_calls(), 1);
}
