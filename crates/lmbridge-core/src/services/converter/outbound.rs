//! Client → backend translation.
//!
//! The backend has no system role, no legacy function-call form and no remote
//! image fetch, so each of those is rewritten here. Result messages that
//! cannot be tied to a call are degraded to user text instead of failing.

use std::collections::{HashMap, HashSet, VecDeque};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::debug;

use crate::contracts::{ChatCompletionRequest, ChatMessage, ContentPart, MessageContent, Role};
use crate::ports::{BackendMessage, BackendOptions, BackendPart, BackendRequest, BackendRole};
use crate::services::tools::PreparedTools;
use crate::settings::ImagePolicy;

/// How image parts are handled for this request.
#[derive(Debug, Clone, Copy)]
pub struct ImageHandling<'a> {
    /// Backend and routed model both accept binary images.
    pub forward_binary: bool,
    pub policy: &'a ImagePolicy,
}

/// Build the backend call for a validated request.
#[must_use]
pub fn to_backend_request(
    request: &ChatCompletionRequest,
    model_id: &str,
    tools: &PreparedTools,
    images: ImageHandling<'_>,
) -> BackendRequest {
    BackendRequest {
        model_id: model_id.to_string(),
        messages: to_backend_messages(&request.messages, images),
        tools: tools.tools.clone(),
        tool_mode: tools.tool_mode(),
        options: BackendOptions {
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: request.stop.clone().map(|s| s.into_vec()).unwrap_or_default(),
        },
    }
}

/// Producing-side bookkeeping: outstanding call ids, FIFO per function name.
#[derive(Debug, Default)]
struct CallLedger {
    outstanding: HashSet<String>,
    by_name: HashMap<String, VecDeque<String>>,
    client_ids: HashSet<String>,
}

impl CallLedger {
    fn for_messages(messages: &[ChatMessage]) -> Self {
        Self {
            client_ids: messages
                .iter()
                .flat_map(ChatMessage::tool_calls)
                .map(|call| call.id.clone())
                .collect(),
            ..Self::default()
        }
    }

    /// Id for the legacy `function_call` of message `index`, never one a
    /// client-supplied `tool_calls[].id` already uses.
    fn legacy_id(&self, index: usize) -> String {
        let base = format!("fc_{index}");
        let mut id = base.clone();
        let mut suffix = 1;
        while self.client_ids.contains(&id) {
            id = format!("{base}_{suffix}");
            suffix += 1;
        }
        id
    }

    fn record(&mut self, id: &str, name: &str) {
        self.outstanding.insert(id.to_string());
        self.by_name
            .entry(name.to_string())
            .or_default()
            .push_back(id.to_string());
    }

    fn take_id(&mut self, id: &str) -> Option<String> {
        if !self.outstanding.remove(id) {
            return None;
        }
        for queue in self.by_name.values_mut() {
            queue.retain(|queued| queued != id);
        }
        Some(id.to_string())
    }

    /// Oldest outstanding call of `name`.
    fn take_oldest(&mut self, name: &str) -> Option<String> {
        let id = self.by_name.get_mut(name)?.pop_front()?;
        self.outstanding.remove(&id);
        Some(id)
    }
}

/// Translate the message list.
#[must_use]
pub fn to_backend_messages(messages: &[ChatMessage], images: ImageHandling<'_>) -> Vec<BackendMessage> {
    let mut ledger = CallLedger::for_messages(messages);
    let mut out: Vec<BackendMessage> = Vec::with_capacity(messages.len());

    for (index, message) in messages.iter().enumerate() {
        match message.role {
            Role::System => {
                out.push(BackendMessage::user_text(format!("System: {}", message.text_content())));
            }
            Role::User => out.push(BackendMessage {
                role: BackendRole::User,
                parts: content_parts(message.content.as_ref(), images),
            }),
            Role::Assistant => out.push(assistant_message(index, message, &mut ledger)),
            Role::Tool | Role::Function => {
                let content = message.text_content();
                match resolve_result(message, &mut ledger) {
                    Some(call_id) => push_tool_result(&mut out, call_id, content),
                    None => {
                        debug!(index, "Unresolved tool result, sending as text");
                        out.push(BackendMessage::user_text(degraded_result(message, &content)));
                    }
                }
            }
        }
    }
    out
}

fn assistant_message(index: usize, message: &ChatMessage, ledger: &mut CallLedger) -> BackendMessage {
    let mut parts = Vec::new();
    let text = message.text_content();
    if !text.is_empty() {
        parts.push(BackendPart::Text(text));
    }
    for call in message.tool_calls() {
        ledger.record(&call.id, &call.function.name);
        parts.push(BackendPart::ToolCall {
            call_id: call.id.clone(),
            name: call.function.name.clone(),
            input: parse_arguments(&call.function.arguments),
        });
    }
    if let Some(call) = &message.function_call {
        let call_id = ledger.legacy_id(index);
        ledger.record(&call_id, &call.name);
        parts.push(BackendPart::ToolCall {
            call_id,
            name: call.name.clone(),
            input: parse_arguments(&call.arguments),
        });
    }
    if parts.is_empty() {
        parts.push(BackendPart::Text(String::new()));
    }
    BackendMessage {
        role: BackendRole::Assistant,
        parts,
    }
}

fn resolve_result(message: &ChatMessage, ledger: &mut CallLedger) -> Option<String> {
    if let Some(id) = message.tool_call_id.as_deref() {
        return ledger.take_id(id);
    }
    match (message.role, message.name.as_deref()) {
        (Role::Function, Some(name)) => ledger.take_oldest(name),
        _ => None,
    }
}

/// Consecutive results go into one user message.
fn push_tool_result(out: &mut Vec<BackendMessage>, call_id: String, content: String) {
    let part = BackendPart::ToolResult { call_id, content };
    match out.last_mut() {
        Some(last) if last.role == BackendRole::User && last.is_tool_results() => last.parts.push(part),
        _ => out.push(BackendMessage {
            role: BackendRole::User,
            parts: vec![part],
        }),
    }
}

fn degraded_result(message: &ChatMessage, content: &str) -> String {
    match (message.name.as_deref(), message.tool_call_id.as_deref()) {
        (Some(name), _) => format!("Result of function {name}: {content}"),
        (None, Some(id)) => format!("Result of tool call {id}: {content}"),
        (None, None) => format!("Tool result: {content}"),
    }
}

/// Arguments as JSON; an empty string is `{}` and anything unparsable is
/// kept verbatim under `_raw`.
#[must_use]
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "_raw": raw }))
}

// =============================================================================
// Images
// =============================================================================

fn content_parts(content: Option<&MessageContent>, images: ImageHandling<'_>) -> Vec<BackendPart> {
    match content {
        None => vec![BackendPart::Text(String::new())],
        Some(MessageContent::Text(text)) => vec![BackendPart::Text(text.clone())],
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => BackendPart::Text(text.clone()),
                ContentPart::ImageUrl { image_url } => image_part(&image_url.url, images),
            })
            .collect(),
    }
}

fn image_part(url: &str, images: ImageHandling<'_>) -> BackendPart {
    if let Some(rest) = url.strip_prefix("data:") {
        return inline_image(rest, images);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        let host = url_host(url);
        if images
            .policy
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host))
        {
            return BackendPart::Text(format!("[image: {url}]"));
        }
        return BackendPart::Text(format!("[image omitted: host '{host}' is not allowed]"));
    }
    BackendPart::Text("[image omitted: unsupported image URL]".to_string())
}

/// `rest` is the data URI without its `data:` prefix.
fn inline_image(rest: &str, images: ImageHandling<'_>) -> BackendPart {
    let Some((meta, payload)) = rest.split_once(',') else {
        return BackendPart::Text("[image omitted: malformed data URI]".to_string());
    };
    let Some(mime_type) = meta.strip_suffix(";base64") else {
        return BackendPart::Text("[image omitted: data URI is not base64]".to_string());
    };
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };

    let limit = images.policy.max_image_bytes;
    if payload.len() / 4 * 3 > limit {
        return BackendPart::Text(format!("[image omitted: larger than {limit} bytes]"));
    }
    if !images.forward_binary {
        return BackendPart::Text(format!(
            "[image: {mime_type} attachment not supported by this model]"
        ));
    }
    match STANDARD.decode(payload) {
        Ok(data) if data.len() > limit => {
            BackendPart::Text(format!("[image omitted: larger than {limit} bytes]"))
        }
        Ok(data) => BackendPart::Image {
            mime_type: mime_type.to_string(),
            data: Bytes::from(data),
        },
        Err(_) => BackendPart::Text("[image omitted: invalid base64 data]".to_string()),
    }
}

fn url_host(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    host_port.split(':').next().unwrap_or_default()
}
