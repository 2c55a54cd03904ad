//! Request parsing and validation.
//!
//! Validation runs in three steps:
//!
//! 1. [`parse_request`] decodes the body in two stages so schema errors point
//!    at the offending `messages[i]`.
//! 2. Structural rules on each field and message.
//! 3. A single left-to-right correlation pass that matches every `tool` /
//!    `function` result to exactly one pending assistant tool call.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::contracts::{
    ChatCompletionRequest, ChatMessage, FunctionCallChoice, Role, ToolChoice,
};
use crate::error::ValidationError;
use crate::settings::GatewaySettings;

/// Size limits applied during structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_messages: usize,
    pub max_message_chars: usize,
}

impl ValidationLimits {
    #[must_use]
    pub const fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            max_messages: settings.max_messages,
            max_message_chars: settings.max_message_chars,
        }
    }
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self::from_settings(&GatewaySettings::default())
    }
}

/// What the correlation pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    /// Tool calls (modern and legacy) carried by assistant messages.
    pub tool_calls: usize,
    /// Results matched to a pending call.
    pub resolved: usize,
    /// Calls left without a result (the model's turn to answer them).
    pub pending: usize,
}

// =============================================================================
// Parsing
// =============================================================================

/// Decode a request body.
///
/// Malformed JSON and top-level schema errors report no `param`; a message
/// that fails to decode reports `messages[i]`.
pub fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest, ValidationError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ValidationError::new(format!("Invalid JSON body: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(ValidationError::new("Request body must be a JSON object"));
    };

    let raw_messages = match object.remove("messages") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ValidationError::at("messages", "must be an array")),
        None => return Err(ValidationError::at("messages", "is required")),
    };

    let mut messages = Vec::with_capacity(raw_messages.len());
    for (i, raw) in raw_messages.into_iter().enumerate() {
        let message: ChatMessage = serde_json::from_value(raw)
            .map_err(|e| ValidationError::at(format!("messages[{i}]"), e.to_string()))?;
        messages.push(message);
    }

    object.insert("messages".to_string(), Value::Array(Vec::new()));
    let mut request: ChatCompletionRequest = serde_json::from_value(Value::Object(object))
        .map_err(|e| ValidationError::new(format!("Invalid request: {e}")))?;
    request.messages = messages;
    Ok(request)
}

// =============================================================================
// Structural validation
// =============================================================================

/// `^[a-zA-Z0-9_-]{1,64}$`
#[must_use]
pub fn is_valid_function_name(name: &str) -> bool {
    (1..=64).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Run structural validation and the correlation pass.
pub fn validate_request(
    request: &ChatCompletionRequest,
    limits: ValidationLimits,
) -> Result<ValidationSummary, ValidationError> {
    validate_fields(request)?;
    validate_tools(request)?;

    if request.messages.is_empty() {
        return Err(ValidationError::at("messages", "must not be empty"));
    }
    if request.messages.len() > limits.max_messages {
        return Err(ValidationError::at(
            "messages",
            format!(
                "too many messages ({} > {})",
                request.messages.len(),
                limits.max_messages
            ),
        ));
    }
    for (i, message) in request.messages.iter().enumerate() {
        validate_message(i, message, limits)?;
    }

    correlate_tool_calls(&request.messages)
}

fn validate_fields(request: &ChatCompletionRequest) -> Result<(), ValidationError> {
    if request.model.trim().is_empty() {
        return Err(ValidationError::at("model", "must not be empty"));
    }
    if let Some(t) = request.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ValidationError::at("temperature", "must be between 0 and 2"));
        }
    }
    if let Some(p) = request.top_p {
        if !(0.0..=1.0).contains(&p) {
            return Err(ValidationError::at("top_p", "must be between 0 and 1"));
        }
    }
    if request.n.is_some_and(|n| n != 1) {
        return Err(ValidationError::at("n", "only n=1 is supported"));
    }
    Ok(())
}

fn validate_tools(request: &ChatCompletionRequest) -> Result<(), ValidationError> {
    let mut known = HashSet::new();

    if let Some(tools) = &request.tools {
        let mut seen = HashSet::new();
        for (i, tool) in tools.iter().enumerate() {
            if tool.r#type != "function" {
                return Err(ValidationError::at(
                    format!("tools[{i}].type"),
                    format!("unsupported tool type '{}'", tool.r#type),
                ));
            }
            check_name(&format!("tools[{i}].function.name"), &tool.function.name)?;
            if !seen.insert(tool.function.name.as_str()) {
                return Err(ValidationError::at(
                    format!("tools[{i}].function.name"),
                    format!("duplicate tool name '{}'", tool.function.name),
                ));
            }
            known.insert(tool.function.name.as_str());
        }
    }

    if let Some(functions) = &request.functions {
        let mut seen = HashSet::new();
        for (i, function) in functions.iter().enumerate() {
            check_name(&format!("functions[{i}].name"), &function.name)?;
            if !seen.insert(function.name.as_str()) {
                return Err(ValidationError::at(
                    format!("functions[{i}].name"),
                    format!("duplicate function name '{}'", function.name),
                ));
            }
            known.insert(function.name.as_str());
        }
    }

    if request.tool_choice.is_some() && request.function_call.is_some() {
        return Err(ValidationError::at(
            "function_call",
            "cannot be combined with tool_choice",
        ));
    }

    let forced = match (&request.tool_choice, &request.function_call) {
        (Some(ToolChoice::Named(named)), _) => {
            if named.r#type != "function" {
                return Err(ValidationError::at(
                    "tool_choice.type",
                    format!("unsupported tool_choice type '{}'", named.r#type),
                ));
            }
            Some(("tool_choice.function.name", named.function.name.as_str()))
        }
        (_, Some(FunctionCallChoice::Named(named))) => {
            Some(("function_call.name", named.name.as_str()))
        }
        _ => None,
    };
    if let Some((param, name)) = forced {
        if !known.contains(name) {
            return Err(ValidationError::at(
                param,
                format!("forced tool '{name}' is not among the offered tools"),
            ));
        }
    }
    Ok(())
}

fn check_name(param: &str, name: &str) -> Result<(), ValidationError> {
    if is_valid_function_name(name) {
        Ok(())
    } else {
        Err(ValidationError::at(
            param,
            format!("invalid name '{name}'; expected 1-64 characters from [a-zA-Z0-9_-]"),
        ))
    }
}

fn validate_message(
    i: usize,
    message: &ChatMessage,
    limits: ValidationLimits,
) -> Result<(), ValidationError> {
    let at = |field: &str| {
        if field.is_empty() {
            format!("messages[{i}]")
        } else {
            format!("messages[{i}].{field}")
        }
    };

    let has_calls = !message.tool_calls().is_empty() || message.function_call.is_some();

    if message.tool_calls.is_some() && message.function_call.is_some() {
        return Err(ValidationError::at(
            at(""),
            "cannot carry both tool_calls and function_call",
        ));
    }
    if has_calls && message.role != Role::Assistant {
        return Err(ValidationError::at(
            at("tool_calls"),
            format!("only assistant messages may carry tool calls, got role '{}'", message.role),
        ));
    }
    if message.tool_call_id.is_some() && !matches!(message.role, Role::Tool | Role::Function) {
        return Err(ValidationError::at(
            at("tool_call_id"),
            format!("not allowed on role '{}'", message.role),
        ));
    }

    match (&message.content, message.role) {
        (None, Role::Assistant) if has_calls => {}
        (None, _) => return Err(ValidationError::at(at("content"), "is required")),
        (Some(content), Role::System | Role::User) if content.is_empty() => {
            return Err(ValidationError::at(at("content"), "must not be empty"));
        }
        (Some(content), Role::Assistant) if content.is_empty() && !has_calls => {
            return Err(ValidationError::at(at("content"), "must not be empty"));
        }
        (Some(content), _) => {
            let chars = content.char_len();
            if chars > limits.max_message_chars {
                return Err(ValidationError::at(
                    at("content"),
                    format!(
                        "message too large ({chars} > {} characters)",
                        limits.max_message_chars
                    ),
                ));
            }
        }
    }

    match message.role {
        Role::Tool => {
            if message.tool_call_id.as_deref().is_none_or(str::is_empty) {
                return Err(ValidationError::at(at("tool_call_id"), "is required for tool messages"));
            }
        }
        Role::Function => {
            if message.name.as_deref().is_none_or(str::is_empty) {
                return Err(ValidationError::at(at("name"), "is required for function messages"));
            }
        }
        Role::System | Role::User | Role::Assistant => {}
    }

    for (j, call) in message.tool_calls().iter().enumerate() {
        if call.id.is_empty() {
            return Err(ValidationError::at(at(&format!("tool_calls[{j}].id")), "must not be empty"));
        }
        if call.r#type != "function" {
            return Err(ValidationError::at(
                at(&format!("tool_calls[{j}].type")),
                format!("unsupported tool call type '{}'", call.r#type),
            ));
        }
        check_name(&at(&format!("tool_calls[{j}].function.name")), &call.function.name)?;
    }
    if let Some(call) = &message.function_call {
        check_name(&at("function_call.name"), &call.name)?;
    }
    Ok(())
}

// =============================================================================
// Tool-call correlation
// =============================================================================

#[derive(Debug, Clone)]
struct PendingByName {
    id: Option<String>,
    index: usize,
}

#[derive(Debug, Default)]
struct Correlator {
    by_id: HashMap<String, (String, usize)>,
    by_name: HashMap<String, Vec<PendingByName>>,
    seen_ids: HashSet<String>,
    summary: ValidationSummary,
}

impl Correlator {
    fn register(
        &mut self,
        param: String,
        id: Option<&str>,
        name: &str,
        index: usize,
    ) -> Result<(), ValidationError> {
        if let Some(id) = id {
            if !self.seen_ids.insert(id.to_string()) {
                return Err(ValidationError::at(
                    param,
                    format!("duplicate tool call id '{id}'"),
                ));
            }
            self.by_id.insert(id.to_string(), (name.to_string(), index));
        }
        self.by_name
            .entry(name.to_string())
            .or_default()
            .push(PendingByName {
                id: id.map(str::to_string),
                index,
            });
        self.summary.tool_calls += 1;
        Ok(())
    }

    /// Remove a pending call found by id from both indexes; returns its name.
    fn consume_id(&mut self, id: &str) -> Option<String> {
        let (name, _) = self.by_id.remove(id)?;
        if let Some(entries) = self.by_name.get_mut(&name) {
            entries.retain(|e| e.id.as_deref() != Some(id));
        }
        self.summary.resolved += 1;
        Some(name)
    }

    fn resolve_tool(&mut self, i: usize, id: &str) -> Result<(), ValidationError> {
        self.consume_id(id).map(|_| ()).ok_or_else(|| {
            ValidationError::at(
                format!("messages[{i}].tool_call_id"),
                format!("no matching assistant tool call for id '{id}'"),
            )
        })
    }

    fn resolve_function(
        &mut self,
        i: usize,
        id: Option<&str>,
        name: &str,
    ) -> Result<(), ValidationError> {
        if let Some(id) = id {
            let Some((expected, _)) = self.by_id.get(id) else {
                return Err(ValidationError::at(
                    format!("messages[{i}].tool_call_id"),
                    format!("no matching assistant tool call for id '{id}'"),
                ));
            };
            if expected != name {
                return Err(ValidationError::at(
                    format!("messages[{i}].name"),
                    format!("tool call '{id}' maps to function '{expected}', not '{name}'"),
                ));
            }
            self.consume_id(id);
            return Ok(());
        }

        let entries = self.by_name.get_mut(name).filter(|e| !e.is_empty());
        let Some(entries) = entries else {
            return Err(ValidationError::at(
                format!("messages[{i}].name"),
                format!("no matching call for function '{name}'"),
            ));
        };
        if entries.len() > 1 {
            let producers: Vec<String> = entries.iter().map(|e| e.index.to_string()).collect();
            return Err(ValidationError::at(
                format!("messages[{i}].name"),
                format!(
                    "ambiguous result for function '{name}': {} pending calls (from messages {}); supply an explicit id",
                    entries.len(),
                    producers.join(", ")
                ),
            ));
        }
        let entry = entries.remove(0);
        if let Some(id) = entry.id {
            self.by_id.remove(&id);
        }
        self.summary.resolved += 1;
        Ok(())
    }

    fn finish(mut self) -> ValidationSummary {
        self.summary.pending = self.by_name.values().map(Vec::len).sum();
        self.summary
    }
}

/// Match every tool/function result against the calls pending before it.
///
/// Calls still pending at the end are allowed.
pub fn correlate_tool_calls(messages: &[ChatMessage]) -> Result<ValidationSummary, ValidationError> {
    let mut correlator = Correlator::default();

    for (i, message) in messages.iter().enumerate() {
        match message.role {
            Role::Assistant => {
                for (j, call) in message.tool_calls().iter().enumerate() {
                    correlator.register(
                        format!("messages[{i}].tool_calls[{j}].id"),
                        Some(&call.id),
                        &call.function.name,
                        i,
                    )?;
                }
                if let Some(call) = &message.function_call {
                    correlator.register(
                        format!("messages[{i}].function_call"),
                        None,
                        &call.name,
                        i,
                    )?;
                }
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                correlator.resolve_tool(i, id)?;
            }
            Role::Function => {
                let name = message.name.as_deref().unwrap_or_default();
                correlator.resolve_function(i, message.tool_call_id.as_deref(), name)?;
            }
            Role::System | Role::User => {}
        }
    }

    Ok(correlator.finish())
}
