//! Upstream SSE stream to backend fragments.
//!
//! Text deltas are forwarded as soon as they arrive. Tool-call deltas are
//! accumulated per `index` and released as whole calls once the upstream
//! reports a finish reason (or the stream ends), because the port's
//! [`BackendFragment::ToolCall`] carries complete, parsed arguments.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use lmbridge_core::services::converter::parse_arguments;
use lmbridge_core::{BackendError, BackendFragment};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// State threaded through the `unfold` stream.
struct SseState<S> {
    stream: S,
    buf: BytesMut,
    calls: BTreeMap<usize, PendingCall>,
    ready: VecDeque<BackendFragment>,
    eof: bool,
    done: bool,
}

/// Convert an upstream SSE byte stream into backend fragments.
///
/// SSE format: `data: {"choices":[{"delta":{"content":"hi"}}]}\n\n`
pub fn fragments<S, E>(byte_stream: S) -> impl Stream<Item = Result<BackendFragment, BackendError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        calls: BTreeMap::new(),
        ready: VecDeque::new(),
        eof: false,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.ready.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }

            // Try to extract a complete SSE line from the buffer.
            if let Some(line_end) = find_newline(&st.buf) {
                let line = st.buf.split_to(line_end + 1);
                let line = String::from_utf8_lossy(&line);
                if let Err(e) = st.handle_line(line.trim()) {
                    st.done = true;
                    return Some((Err(e), st));
                }
                continue;
            }

            if st.eof {
                // Stream ended without [DONE].
                if !st.buf.is_empty() {
                    let rest = st.buf.split();
                    let rest = String::from_utf8_lossy(&rest);
                    if let Err(e) = st.handle_line(rest.trim()) {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
                st.flush_calls();
                st.done = true;
                continue;
            }

            // Need more data from upstream.
            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("Upstream stream error: {e}");
                    st.done = true;
                    return Some((Err(BackendError::other(format!("upstream stream error: {e}"))), st));
                }
                None => st.eof = true,
            }
        }
    })
}

impl<S> SseState<S> {
    fn handle_line(&mut self, line: &str) -> Result<(), BackendError> {
        // Skip empty lines, SSE comments and event names.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.flush_calls();
            self.done = true;
            return Ok(());
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Skipping unparsable upstream SSE line");
                return Ok(());
            }
        };

        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(BackendError::other(format!("upstream error: {message}")));
        }

        let Some(choice) = chunk.pointer("/choices/0") else {
            return Ok(());
        };

        if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str)
            && !text.is_empty()
        {
            self.ready.push_back(BackendFragment::Text(text.to_string()));
        }

        if let Some(deltas) = choice.pointer("/delta/tool_calls").and_then(Value::as_array) {
            for delta in deltas {
                self.accumulate(delta);
            }
        }

        if choice.get("finish_reason").is_some_and(|r| !r.is_null()) {
            self.flush_calls();
        }
        Ok(())
    }

    fn accumulate(&mut self, delta: &Value) {
        let index = delta.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
        let entry = self.calls.entry(index).or_default();
        if let Some(id) = delta.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            entry.id = Some(id.to_string());
        }
        if let Some(function) = delta.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str).filter(|s| !s.is_empty()) {
                entry.name = Some(name.to_string());
            }
            if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                entry.arguments.push_str(args);
            }
        }
    }

    fn flush_calls(&mut self) {
        for (index, call) in std::mem::take(&mut self.calls) {
            let Some(name) = call.name else {
                warn!(index, "Dropping upstream tool call without a name");
                continue;
            };
            let call_id = call
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            self.ready.push_back(BackendFragment::ToolCall {
                call_id,
                name,
                input: parse_arguments(&call.arguments),
            });
        }
    }
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}
