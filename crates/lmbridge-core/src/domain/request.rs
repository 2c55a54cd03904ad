//! Per-request scratch state.

use crate::contracts::ChatCompletionRequest;

use super::capabilities::{ModelCapabilities, RequiredCapabilities};

/// Scratch state for one chat completion request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Completion id (`chatcmpl-...`), also used as the log correlation id.
    pub id: String,
    pub model_id: String,
    pub stream: bool,
    pub estimated_tokens: u32,
    /// Resolved after routing.
    pub capabilities: Option<ModelCapabilities>,
    pub required: RequiredCapabilities,
}

impl RequestContext {
    /// Derive the context from a validated request.
    #[must_use]
    pub fn from_request(request: &ChatCompletionRequest, estimated_tokens: u32) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model_id: request.model.clone(),
            stream: request.stream,
            estimated_tokens,
            capabilities: None,
            required: required_capabilities(request),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Required tags the routed model was not detected to offer.
    #[must_use]
    pub fn missing_capabilities(&self) -> RequiredCapabilities {
        self.capabilities
            .as_ref()
            .map_or(self.required, |caps| self.required - caps.offered())
    }
}

/// Images present ⇒ vision; tools offered or tool calls present ⇒ tools.
#[must_use]
pub fn required_capabilities(request: &ChatCompletionRequest) -> RequiredCapabilities {
    let mut required = RequiredCapabilities::empty();

    let has_images = request
        .messages
        .iter()
        .any(|m| m.content.as_ref().is_some_and(|c| c.has_images()));
    if has_images {
        required |= RequiredCapabilities::VISION;
    }

    let offers_tools = request.tools.as_ref().is_some_and(|t| !t.is_empty())
        || request.functions.as_ref().is_some_and(|f| !f.is_empty());
    let has_tool_calls = request
        .messages
        .iter()
        .any(|m| !m.tool_calls().is_empty() || m.function_call.is_some());
    if offers_tools || has_tool_calls {
        required |= RequiredCapabilities::TOOLS;
    }

    required
}
