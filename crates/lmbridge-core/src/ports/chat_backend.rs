//! Chat backend port.
//!
//! This port defines the native call shape of the chat-completion capability
//! that sits behind the gateway. It knows nothing about the OpenAI protocol:
//! messages are typed part lists, responses are a stream of text and
//! tool-call fragments, and every call accepts a cancellation token that the
//! implementation observes at its next yield point.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Model description as reported by the backend during enumeration.
///
/// The backend keeps the live handle for each model; the gateway only ever
/// refers to a model by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendModelInfo {
    pub id: String,
    pub vendor: String,
    pub family: String,
    pub version: Option<String>,
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
}

/// Role in the backend's message shape. The backend has no system role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    User,
    Assistant,
}

/// A single part of a backend message.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendPart {
    Text(String),
    ToolCall {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
    Image {
        mime_type: String,
        data: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendMessage {
    pub role: BackendRole,
    pub parts: Vec<BackendPart>,
}

impl BackendMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: BackendRole::User,
            parts: vec![BackendPart::Text(text.into())],
        }
    }

    /// True when every part is a tool result.
    #[must_use]
    pub fn is_tool_results(&self) -> bool {
        !self.parts.is_empty()
            && self
                .parts
                .iter()
                .all(|p| matches!(p, BackendPart::ToolResult { .. }))
    }
}

/// A callable tool offered to the backend for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTool {
    pub name: String,
    pub description: String,
    pub input_schema: Option<serde_json::Value>,
}

/// How the backend should treat the offered tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendToolMode {
    #[default]
    Auto,
    Required,
}

/// Sampling options forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

/// One backend invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub model_id: String,
    pub messages: Vec<BackendMessage>,
    pub tools: Vec<BackendTool>,
    pub tool_mode: BackendToolMode,
    pub options: BackendOptions,
}

impl BackendRequest {
    /// Same request with every tool removed.
    #[must_use]
    pub fn without_tools(&self) -> Self {
        Self {
            tools: Vec::new(),
            tool_mode: BackendToolMode::Auto,
            ..self.clone()
        }
    }
}

/// A fragment of a streamed backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendFragment {
    Text(String),
    ToolCall {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Response handle: an async stream of fragments.
pub struct BackendResponse {
    pub fragments: BoxStream<'static, Result<BackendFragment, BackendError>>,
}

impl BackendResponse {
    pub fn new(fragments: BoxStream<'static, Result<BackendFragment, BackendError>>) -> Self {
        Self { fragments }
    }
}

impl std::fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResponse").finish_non_exhaustive()
    }
}

/// Stable error codes raised by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    NotFound,
    NoPermissions,
    Blocked,
    ContextLengthExceeded,
    Other,
}

impl BackendErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::NoPermissions => "NoPermissions",
            Self::Blocked => "Blocked",
            Self::ContextLengthExceeded => "ContextLengthExceeded",
            Self::Other => "Other",
        }
    }
}

/// Typed backend failure.
#[derive(Debug, Clone, Error)]
#[error("{message} ({})", code.as_str())]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Other, message)
    }
}

/// Port for the chat-completion capability behind the gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackendPort: Send + Sync {
    /// Enumerate the models currently offered by the backend.
    async fn list_models(&self) -> Result<Vec<BackendModelInfo>, BackendError>;

    /// Send a message list and return the response fragment stream.
    ///
    /// Implementations must stop producing fragments once `cancel` fires.
    async fn send_request(
        &self,
        request: BackendRequest,
        cancel: CancellationToken,
    ) -> Result<BackendResponse, BackendError>;

    /// Exact prompt token count, when the backend can compute one.
    async fn count_tokens(&self, _model_id: &str, _text: &str) -> Option<u32> {
        None
    }

    /// Whether the backend accepts binary image parts at all.
    fn supports_image_input(&self) -> bool {
        false
    }
}
