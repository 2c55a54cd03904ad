//! Backend → client translation for non-streaming responses.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::contracts::{
    ChatChoice, ChatCompletionResponse, FinishReason, ResponseMessage, Role, ToolCall, Usage,
};
use crate::ports::{BackendError, BackendFragment};
use crate::services::tokens::estimate_tokens;

/// A fully drained backend response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AggregatedResponse {
    pub fn push(&mut self, fragment: BackendFragment) {
        match fragment {
            BackendFragment::Text(text) => self.text.push_str(&text),
            BackendFragment::ToolCall {
                call_id,
                name,
                input,
            } => self
                .tool_calls
                .push(ToolCall::new(ensure_call_id(call_id), name, input.to_string())),
        }
    }

    /// Estimated completion tokens.
    #[must_use]
    pub fn completion_tokens(&self) -> u32 {
        self.tool_calls.iter().fold(estimate_tokens(&self.text), |acc, call| {
            acc.saturating_add(estimate_tokens(&call.function.name))
                .saturating_add(estimate_tokens(&call.function.arguments))
        })
    }
}

/// Backends may omit call ids; the client always needs one.
pub(crate) fn ensure_call_id(call_id: String) -> String {
    if call_id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        call_id
    }
}

/// Drain a fragment stream.
pub async fn collect_response(
    mut fragments: BoxStream<'static, Result<BackendFragment, BackendError>>,
) -> Result<AggregatedResponse, BackendError> {
    let mut aggregated = AggregatedResponse::default();
    while let Some(fragment) = fragments.next().await {
        aggregated.push(fragment?);
    }
    Ok(aggregated)
}

/// `tool_calls` when any call was made (`function_call` for a legacy
/// request with exactly one call), otherwise `stop`.
#[must_use]
pub const fn finish_reason(tool_calls: usize, legacy: bool) -> FinishReason {
    match tool_calls {
        0 => FinishReason::Stop,
        1 if legacy => FinishReason::FunctionCall,
        _ => FinishReason::ToolCalls,
    }
}

/// Build the single completion object.
#[must_use]
pub fn build_completion(
    id: &str,
    model: &str,
    created: i64,
    response: AggregatedResponse,
    legacy: bool,
    prompt_tokens: u32,
) -> ChatCompletionResponse {
    let usage = Usage::new(prompt_tokens, response.completion_tokens());
    let reason = finish_reason(response.tool_calls.len(), legacy);
    let AggregatedResponse { text, mut tool_calls } = response;

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };
    let message = match reason {
        FinishReason::FunctionCall => ResponseMessage {
            role: Role::Assistant,
            content,
            tool_calls: None,
            function_call: tool_calls.pop().map(|call| call.function),
        },
        FinishReason::ToolCalls => ResponseMessage {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            function_call: None,
        },
        FinishReason::Stop | FinishReason::Length => ResponseMessage {
            role: Role::Assistant,
            content,
            tool_calls: None,
            function_call: None,
        },
    };

    ChatCompletionResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message,
            finish_reason: Some(reason),
        }],
        usage: Some(usage),
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use serde_json::json;

    use super::*;

    fn fragments(items: Vec<BackendFragment>) -> BoxStream<'static, Result<BackendFragment, BackendError>> {
        stream::iter(items.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn test_collect_and_build_text_completion() {
        let aggregated = collect_response(fragments(vec![
            BackendFragment::Text("Hel".to_string()),
            BackendFragment::Text("lo".to_string()),
        ]))
        .await
        .unwrap();
        let completion = build_completion("chatcmpl-1", "m", 0, aggregated, false, 3);

        let choice = &completion.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("Hello"));
        assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
        assert_eq!(completion.usage, Some(Usage::new(3, 2)));
        assert_eq!(completion.object, "chat.completion");
    }

    #[tokio::test]
    async fn test_tool_calls_set_finish_reason() {
        let aggregated = collect_response(fragments(vec![BackendFragment::ToolCall {
            call_id: "c1".to_string(),
            name: "weather".to_string(),
            input: json!({"city": "Oslo"}),
        }]))
        .await
        .unwrap();
        let completion = build_completion("id", "m", 0, aggregated, false, 0);
        let message = &completion.choices[0].message;
        assert_eq!(completion.choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert!(message.content.is_none());
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Oslo"}"#);
    }

    #[test]
    fn test_legacy_single_call_uses_function_call() {
        let mut aggregated = AggregatedResponse::default();
        aggregated.push(BackendFragment::ToolCall {
            call_id: String::new(),
            name: "lookup".to_string(),
            input: json!({}),
        });
        let completion = build_completion("id", "m", 0, aggregated.clone(), true, 0);
        let choice = &completion.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::FunctionCall));
        assert_eq!(choice.message.function_call.as_ref().unwrap().name, "lookup");
        assert!(choice.message.tool_calls.is_none());
        assert!(aggregated.tool_calls[0].id.starts_with("call_"));

        aggregated.push(BackendFragment::ToolCall {
            call_id: "c2".to_string(),
            name: "lookup".to_string(),
            input: json!({}),
        });
        let completion = build_completion("id", "m", 0, aggregated, true, 0);
        assert_eq!(completion.choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_stream_error_propagates() {
        let items: Vec<Result<BackendFragment, BackendError>> = vec![
            Ok(BackendFragment::Text("partial".to_string())),
            Err(BackendError::other("connection reset")),
        ];
        let result = tokio_test::block_on(collect_response(stream::iter(items).boxed()));
        assert!(result.is_err());
    }
}
