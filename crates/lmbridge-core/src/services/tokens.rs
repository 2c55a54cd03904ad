//! Token estimation.
//!
//! There is no tokenizer here. Counts are `ceil(chars / 4)` unless the
//! backend can count exactly.

use crate::contracts::ChatCompletionRequest;

/// Rough token count for a piece of text.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Estimated prompt size: message text, tool-call arguments and tool
/// definitions.
#[must_use]
pub fn estimate_request_tokens(request: &ChatCompletionRequest) -> u32 {
    let mut total: u32 = 0;
    for message in &request.messages {
        total = total.saturating_add(estimate_tokens(&message.text_content()));
        for call in message.tool_calls() {
            total = total
                .saturating_add(estimate_tokens(&call.function.name))
                .saturating_add(estimate_tokens(&call.function.arguments));
        }
        if let Some(call) = &message.function_call {
            total = total
                .saturating_add(estimate_tokens(&call.name))
                .saturating_add(estimate_tokens(&call.arguments));
        }
    }

    let definitions = request
        .tools
        .iter()
        .flatten()
        .map(|t| &t.function)
        .chain(request.functions.iter().flatten());
    for definition in definitions {
        let schema = definition
            .parameters
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        total = total
            .saturating_add(estimate_tokens(&definition.name))
            .saturating_add(estimate_tokens(definition.description.as_deref().unwrap_or_default()))
            .saturating_add(estimate_tokens(&schema));
    }
    total
}

/// Flatten the prompt into one string for backends that count exactly.
#[must_use]
pub fn prompt_text(request: &ChatCompletionRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text_content()))
        .collect::<Vec<_>>()
        .join("\n")
}
