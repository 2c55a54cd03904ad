//! Backend fragments → OpenAI streaming chunks.
//!
//! In required tool mode every chunk is held back until the first tool call
//! arrives. If the stream ends without one, nothing has been released and
//! [`StreamTranslator::finish`] fails instead, so the caller can still answer
//! with a plain error.
//!
//! Replies to legacy `functions` requests hold their calls until the end:
//! exactly one call goes out as a `function_call` delta, several fall back to
//! `tool_calls` deltas, matching the non-streaming completion.

use crate::contracts::{
    ChatChunkChoice, ChatCompletionChunk, ChatDelta, Role, ToolCallDelta, ToolCallFunctionDelta,
    Usage,
};
use crate::error::GatewayError;
use crate::ports::BackendFragment;
use crate::services::tokens::estimate_tokens;

use super::inbound::{ensure_call_id, finish_reason};

/// Per-stream options.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub required: bool,
    pub legacy: bool,
    pub include_usage: bool,
    pub prompt_tokens: u32,
}

/// Stateful translator for one streamed response.
#[derive(Debug)]
pub struct StreamTranslator {
    context: StreamContext,
    role_sent: bool,
    tool_calls: u32,
    completion_tokens: u32,
    held: Vec<ChatCompletionChunk>,
    legacy_calls: Vec<ToolCallDelta>,
}

impl StreamTranslator {
    #[must_use]
    pub const fn new(context: StreamContext) -> Self {
        Self {
            context,
            role_sent: false,
            tool_calls: 0,
            completion_tokens: 0,
            held: Vec::new(),
            legacy_calls: Vec::new(),
        }
    }

    /// Whether chunks are currently being held back.
    #[must_use]
    pub const fn is_buffering(&self) -> bool {
        self.context.required && self.tool_calls == 0
    }

    #[must_use]
    pub const fn tool_calls(&self) -> u32 {
        self.tool_calls
    }

    /// Translate one fragment. Returns the chunks ready to send, possibly
    /// none while buffering, or several when a buffer is released.
    pub fn on_fragment(&mut self, fragment: BackendFragment) -> Vec<ChatCompletionChunk> {
        let delta = match fragment {
            BackendFragment::Text(text) if text.is_empty() => return Vec::new(),
            BackendFragment::Text(text) => {
                self.completion_tokens = self.completion_tokens.saturating_add(estimate_tokens(&text));
                ChatDelta {
                    content: Some(text),
                    ..ChatDelta::default()
                }
            }
            BackendFragment::ToolCall {
                call_id,
                name,
                input,
            } => {
                let arguments = input.to_string();
                self.completion_tokens = self
                    .completion_tokens
                    .saturating_add(estimate_tokens(&name))
                    .saturating_add(estimate_tokens(&arguments));
                let call = ToolCallDelta {
                    index: self.tool_calls,
                    id: Some(ensure_call_id(call_id)),
                    r#type: Some("function".to_string()),
                    function: Some(ToolCallFunctionDelta {
                        name: Some(name),
                        arguments: Some(arguments),
                    }),
                };
                self.tool_calls += 1;
                if self.context.legacy {
                    self.legacy_calls.push(call);
                    return std::mem::take(&mut self.held);
                }
                ChatDelta {
                    tool_calls: Some(vec![call]),
                    ..ChatDelta::default()
                }
            }
        };

        let chunk = self.chunk(delta, None);
        if self.is_buffering() {
            self.held.push(chunk);
            return Vec::new();
        }
        if self.held.is_empty() {
            vec![chunk]
        } else {
            let mut released = std::mem::take(&mut self.held);
            released.push(chunk);
            released
        }
    }

    /// Terminal chunk (and usage chunk when requested).
    ///
    /// Fails with [`GatewayError::ToolCallRequired`] if required mode was
    /// never satisfied; held chunks are discarded.
    pub fn finish(mut self) -> Result<Vec<ChatCompletionChunk>, GatewayError> {
        if self.is_buffering() {
            return Err(GatewayError::ToolCallRequired);
        }
        let reason = finish_reason(self.tool_calls as usize, self.context.legacy);
        let mut chunks = Vec::new();
        let mut legacy_calls = std::mem::take(&mut self.legacy_calls);
        if legacy_calls.len() == 1 {
            let function_call = legacy_calls.pop().and_then(|call| call.function);
            chunks.push(self.chunk(
                ChatDelta {
                    function_call,
                    ..ChatDelta::default()
                },
                None,
            ));
        } else if !legacy_calls.is_empty() {
            chunks.push(self.chunk(
                ChatDelta {
                    tool_calls: Some(legacy_calls),
                    ..ChatDelta::default()
                },
                None,
            ));
        }
        chunks.push(self.chunk(ChatDelta::default(), Some(reason)));
        if self.context.include_usage {
            chunks.push(ChatCompletionChunk {
                id: self.context.id.clone(),
                object: "chat.completion.chunk".to_string(),
                created: self.context.created,
                model: self.context.model.clone(),
                choices: Vec::new(),
                usage: Some(Usage::new(self.context.prompt_tokens, self.completion_tokens)),
            });
        }
        Ok(chunks)
    }

    fn chunk(
        &mut self,
        mut delta: ChatDelta,
        finish_reason: Option<crate::contracts::FinishReason>,
    ) -> ChatCompletionChunk {
        if !self.role_sent {
            delta.role = Some(Role::Assistant);
            self.role_sent = true;
        }
        ChatCompletionChunk {
            id: self.context.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.context.created,
            model: self.context.model.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::contracts::FinishReason;

    fn context(required: bool) -> StreamContext {
        StreamContext {
            id: "chatcmpl-test".to_string(),
            model: "m".to_string(),
            created: 0,
            required,
            legacy: false,
            include_usage: false,
            prompt_tokens: 10,
        }
    }

    fn text(s: &str) -> BackendFragment {
        BackendFragment::Text(s.to_string())
    }

    fn call(id: &str, name: &str) -> BackendFragment {
        BackendFragment::ToolCall {
            call_id: id.to_string(),
            name: name.to_string(),
            input: json!({"q": 1}),
        }
    }

    fn content(chunk: &ChatCompletionChunk) -> Option<&str> {
        chunk.choices[0].delta.content.as_deref()
    }

    #[test]
    fn test_role_only_on_first_chunk() {
        let mut translator = StreamTranslator::new(context(false));
        let first = translator.on_fragment(text("a"));
        let second = translator.on_fragment(text("b"));
        assert_eq!(first[0].choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(second[0].choices[0].delta.role, None);

        let last = translator.finish().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_tool_calls_get_stable_indexes() {
        let mut translator = StreamTranslator::new(context(false));
        let a = translator.on_fragment(call("c1", "f"));
        let b = translator.on_fragment(call("c2", "g"));
        let index = |c: &ChatCompletionChunk| c.choices[0].delta.tool_calls.as_ref().unwrap()[0].index;
        assert_eq!(index(&a[0]), 0);
        assert_eq!(index(&b[0]), 1);

        let last = translator.finish().unwrap();
        assert_eq!(last[0].choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_required_mode_holds_preamble_until_tool_call() {
        let mut translator = StreamTranslator::new(context(true));
        assert!(translator.on_fragment(text("Let me ")).is_empty());
        assert!(translator.on_fragment(text("check.")).is_empty());

        let released = translator.on_fragment(call("c1", "search"));
        assert_eq!(released.len(), 3);
        assert_eq!(content(&released[0]), Some("Let me "));
        assert_eq!(released[0].choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(content(&released[1]), Some("check."));
        assert!(released[2].choices[0].delta.tool_calls.is_some());

        let after = translator.on_fragment(text("done"));
        assert_eq!(after.len(), 1);
        assert!(translator.finish().is_ok());
    }

    #[test]
    fn test_required_mode_without_tool_call_fails() {
        let mut translator = StreamTranslator::new(context(true));
        assert!(translator.on_fragment(text("I would rather chat")).is_empty());
        let err = translator.finish().unwrap_err();
        assert!(matches!(err, GatewayError::ToolCallRequired));
    }

    #[test]
    fn test_usage_chunk_when_requested() {
        let mut translator = StreamTranslator::new(StreamContext {
            include_usage: true,
            ..context(false)
        });
        translator.on_fragment(text("abcdefgh"));
        let last = translator.finish().unwrap();
        assert_eq!(last.len(), 2);
        assert!(last[1].choices.is_empty());
        assert_eq!(last[1].usage, Some(Usage::new(10, 2)));
    }

    #[test]
    fn test_legacy_single_call_streams_as_function_call() {
        let mut translator = StreamTranslator::new(StreamContext {
            legacy: true,
            ..context(false)
        });
        let first = translator.on_fragment(text("One moment."));
        assert_eq!(first.len(), 1);
        assert!(translator.on_fragment(call("c1", "lookup")).is_empty());
        assert_eq!(translator.tool_calls(), 1);

        let last = translator.finish().unwrap();
        assert_eq!(last.len(), 2);
        let delta = &last[0].choices[0].delta;
        assert!(delta.tool_calls.is_none());
        let function_call = delta.function_call.as_ref().unwrap();
        assert_eq!(function_call.name.as_deref(), Some("lookup"));
        assert_eq!(function_call.arguments.as_deref(), Some(r#"{"q":1}"#));
        assert_eq!(last[0].choices[0].finish_reason, None);
        assert_eq!(last[1].choices[0].finish_reason, Some(FinishReason::FunctionCall));
    }

    #[test]
    fn test_legacy_with_several_calls_falls_back_to_tool_calls() {
        let mut translator = StreamTranslator::new(StreamContext {
            legacy: true,
            ..context(false)
        });
        assert!(translator.on_fragment(call("c1", "f")).is_empty());
        assert!(translator.on_fragment(call("c2", "g")).is_empty());

        let last = translator.finish().unwrap();
        let delta = &last[0].choices[0].delta;
        assert_eq!(delta.role, Some(Role::Assistant));
        assert!(delta.function_call.is_none());
        let calls = delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(last[1].choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_legacy_required_mode_releases_preamble_on_call() {
        let mut translator = StreamTranslator::new(StreamContext {
            legacy: true,
            ..context(true)
        });
        assert!(translator.on_fragment(text("Checking.")).is_empty());
        let released = translator.on_fragment(call("c1", "lookup"));
        assert_eq!(released.len(), 1);
        assert_eq!(content(&released[0]), Some("Checking."));
        assert!(!translator.is_buffering());

        let last = translator.finish().unwrap();
        assert!(last[0].choices[0].delta.function_call.is_some());
    }

    #[test]
    fn test_empty_stream_still_sends_role() {
        let translator = StreamTranslator::new(context(false));
        let last = translator.finish().unwrap();
        assert_eq!(last[0].choices[0].delta.role, Some(Role::Assistant));
    }
}
