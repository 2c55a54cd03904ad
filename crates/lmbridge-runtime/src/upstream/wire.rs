//! Upstream wire shapes: backend requests out, model listings in.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lmbridge_core::{
    BackendMessage, BackendModelInfo, BackendPart, BackendRequest, BackendRole, BackendToolMode,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Output budget assumed when the upstream does not report one.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Streaming chat-completions body for one backend request.
pub fn chat_body(request: &BackendRequest) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(request.model_id));
    body.insert("messages".into(), Value::Array(messages(&request.messages)));
    body.insert("stream".into(), json!(true));

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema.clone().unwrap_or_else(|| json!({"type": "object"})),
                    }
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
        if request.tool_mode == BackendToolMode::Required {
            body.insert("tool_choice".into(), json!("required"));
        }
    }

    let options = &request.options;
    if let Some(t) = options.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(p) = options.top_p {
        body.insert("top_p".into(), json!(p));
    }
    if let Some(n) = options.max_tokens {
        body.insert("max_tokens".into(), json!(n));
    }
    if !options.stop.is_empty() {
        body.insert("stop".into(), json!(options.stop));
    }

    Value::Object(body)
}

/// Backend messages as OpenAI messages.
///
/// Tool results split out into one `tool` message each; any text sharing a
/// user turn with them follows as a separate user message.
fn messages(messages: &[BackendMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            BackendRole::User => user_messages(message, &mut out),
            BackendRole::Assistant => out.push(assistant_message(message)),
        }
    }
    out
}

fn user_messages(message: &BackendMessage, out: &mut Vec<Value>) {
    let mut blocks = Vec::new();
    let mut has_image = false;

    for part in &message.parts {
        match part {
            BackendPart::ToolResult { call_id, content } => out.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": content,
            })),
            BackendPart::Text(text) => blocks.push(json!({"type": "text", "text": text})),
            BackendPart::Image { mime_type, data } => {
                has_image = true;
                let url = format!("data:{mime_type};base64,{}", STANDARD.encode(data));
                blocks.push(json!({"type": "image_url", "image_url": {"url": url}}));
            }
            // A user turn never carries calls; ignore rather than invent a role.
            BackendPart::ToolCall { .. } => {}
        }
    }

    if blocks.is_empty() {
        return;
    }
    if has_image {
        out.push(json!({"role": "user", "content": blocks}));
    } else {
        out.push(json!({"role": "user", "content": joined_text(&message.parts)}));
    }
}

fn assistant_message(message: &BackendMessage) -> Value {
    let text = joined_text(&message.parts);
    let calls: Vec<Value> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            BackendPart::ToolCall { call_id, name, input } => Some(json!({
                "id": call_id,
                "type": "function",
                "function": {"name": name, "arguments": arguments_string(input)},
            })),
            _ => None,
        })
        .collect();

    let mut out = Map::new();
    out.insert("role".into(), json!("assistant"));
    out.insert(
        "content".into(),
        if text.is_empty() && !calls.is_empty() {
            Value::Null
        } else {
            json!(text)
        },
    );
    if !calls.is_empty() {
        out.insert("tool_calls".into(), Value::Array(calls));
    }
    Value::Object(out)
}

fn joined_text(parts: &[BackendPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            BackendPart::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Arguments kept verbatim under `_raw` go back out unchanged.
fn arguments_string(input: &Value) -> String {
    if let Some(obj) = input.as_object()
        && obj.len() == 1
        && let Some(Value::String(raw)) = obj.get("_raw")
    {
        return raw.clone();
    }
    input.to_string()
}

// =============================================================================
// Model listing
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<UpstreamModel>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamModel {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub max_model_len: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// llama-server reports training context here.
    #[serde(default)]
    pub meta: Option<UpstreamMeta>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamMeta {
    #[serde(default)]
    pub n_ctx: Option<u32>,
    #[serde(default)]
    pub n_ctx_train: Option<u32>,
}

impl UpstreamModel {
    /// Convert to the port's model description.
    pub fn into_info(self, default_context: u32) -> BackendModelInfo {
        let meta_context = self.meta.as_ref().and_then(|m| m.n_ctx.or(m.n_ctx_train));
        let max_input_tokens = self
            .context_length
            .or(self.max_model_len)
            .or(meta_context)
            .unwrap_or(default_context);
        let family = family_of(&self.id);
        BackendModelInfo {
            vendor: self
                .owned_by
                .filter(|o| !o.is_empty())
                .unwrap_or_else(|| "upstream".to_string()),
            family,
            version: None,
            max_input_tokens,
            max_output_tokens: self.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            id: self.id,
        }
    }
}

/// Model ids may carry a path, a `.gguf` extension or a `:tag`.
fn family_of(id: &str) -> String {
    let name = id.rsplit(['/', '\\']).next().unwrap_or(id);
    let name = name.strip_suffix(".gguf").unwrap_or(name);
    name.split(':').next().unwrap_or(name).to_lowercase()
}
