//! Tool preparation: merge, filter and mode selection for one request.

use crate::contracts::{
    ChatCompletionRequest, FunctionCallChoice, FunctionCallMode, FunctionDefinition, ToolChoice,
    ToolChoiceMode,
};
use crate::error::ValidationError;
use crate::ports::{BackendTool, BackendToolMode};

/// Tool set offered to the backend for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedTools {
    pub tools: Vec<BackendTool>,
    /// The model must produce at least one tool call.
    pub required: bool,
    /// Name forced by `tool_choice` / `function_call`.
    pub forced: Option<String>,
    /// The request used the legacy `functions` field.
    pub legacy: bool,
}

impl PreparedTools {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub const fn tool_mode(&self) -> BackendToolMode {
        if self.required {
            BackendToolMode::Required
        } else {
            BackendToolMode::Auto
        }
    }

    /// Whether a failed call may be retried once without tools.
    #[must_use]
    pub fn allows_fallback(&self) -> bool {
        !self.required && !self.tools.is_empty()
    }
}

/// Merge `tools` and legacy `functions` by name (tools win), apply any
/// forced choice and decide the tool mode.
///
/// A forced name that is not offered fails closed.
pub fn prepare_tools(request: &ChatCompletionRequest) -> Result<PreparedTools, ValidationError> {
    let mut merged: Vec<&FunctionDefinition> = Vec::new();
    for tool in request.tools.iter().flatten() {
        merged.push(&tool.function);
    }
    for function in request.functions.iter().flatten() {
        if !merged.iter().any(|f| f.name == function.name) {
            merged.push(function);
        }
    }

    let (disabled, forced, required_mode) = match (&request.tool_choice, &request.function_call) {
        (Some(ToolChoice::Mode(ToolChoiceMode::None)), _)
        | (_, Some(FunctionCallChoice::Mode(FunctionCallMode::None))) => (true, None, false),
        (Some(ToolChoice::Mode(ToolChoiceMode::Required)), _) => (false, None, true),
        (Some(ToolChoice::Named(named)), _) => (false, Some(named.function.name.clone()), true),
        (_, Some(FunctionCallChoice::Named(named))) => (false, Some(named.name.clone()), true),
        _ => (false, None, false),
    };

    if disabled {
        return Ok(PreparedTools {
            legacy: request.uses_legacy_functions(),
            ..PreparedTools::default()
        });
    }

    if let Some(name) = &forced {
        merged.retain(|f| &f.name == name);
        if merged.is_empty() {
            return Err(ValidationError::at(
                "tool_choice",
                format!("forced tool '{name}' is not among the offered tools"),
            ));
        }
    }

    if required_mode && merged.is_empty() {
        return Err(ValidationError::at(
            "tool_choice",
            "required tool mode needs at least one tool",
        ));
    }

    Ok(PreparedTools {
        tools: merged.into_iter().map(to_backend_tool).collect(),
        required: required_mode,
        forced,
        legacy: request.uses_legacy_functions(),
    })
}

fn to_backend_tool(function: &FunctionDefinition) -> BackendTool {
    BackendTool {
        name: function.name.clone(),
        description: function.description.clone().unwrap_or_default(),
        input_schema: function.parameters.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::contracts::{ChatMessage, FunctionName, NamedToolChoice, Role, ToolDefinition};

    fn function(name: &str, description: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_string(),
            description: Some(description.to_string()),
            parameters: Some(json!({"type": "object"})),
        }
    }

    fn request() -> ChatCompletionRequest {
        let mut req = ChatCompletionRequest::new("m", vec![ChatMessage::text(Role::User, "hi")]);
        req.tools = Some(vec![
            ToolDefinition {
                r#type: "function".to_string(),
                function: function("search", "modern"),
            },
            ToolDefinition {
                r#type: "function".to_string(),
                function: function("fetch", "modern"),
            },
        ]);
        req.functions = Some(vec![function("search", "legacy"), function("lookup", "legacy")]);
        req
    }

    #[test]
    fn test_merge_prefers_tools_array() {
        let prepared = prepare_tools(&request()).unwrap();
        let names: Vec<&str> = prepared.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search", "fetch", "lookup"]);
        assert_eq!(prepared.tools[0].description, "modern");
        assert!(!prepared.required);
        assert!(prepared.allows_fallback());
    }

    #[test]
    fn test_forced_name_filters_and_requires() {
        let mut req = request();
        req.tool_choice = Some(ToolChoice::Named(NamedToolChoice {
            r#type: "function".to_string(),
            function: FunctionName {
                name: "lookup".to_string(),
            },
        }));
        let prepared = prepare_tools(&req).unwrap();
        assert_eq!(prepared.tools.len(), 1);
        assert_eq!(prepared.tools[0].name, "lookup");
        assert!(prepared.required);
        assert!(!prepared.allows_fallback());
        assert_eq!(prepared.tool_mode(), BackendToolMode::Required);
    }

    #[test]
    fn test_unknown_forced_name_fails_closed() {
        let mut req = request();
        req.tools = None;
        req.functions = Some(vec![function("a", "")]);
        req.function_call = Some(FunctionCallChoice::Named(FunctionName {
            name: "missing".to_string(),
        }));
        assert!(prepare_tools(&req).is_err());
    }

    #[test]
    fn test_none_choice_offers_nothing() {
        let mut req = request();
        req.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::None));
        let prepared = prepare_tools(&req).unwrap();
        assert!(prepared.is_empty());
        assert!(!prepared.allows_fallback());
    }

    #[test]
    fn test_required_without_tools_rejected() {
        let mut req = ChatCompletionRequest::new("m", vec![ChatMessage::text(Role::User, "hi")]);
        req.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Required));
        let err = prepare_tools(&req).unwrap_err();
        assert_eq!(err.param.as_deref(), Some("tool_choice"));
    }

    #[test]
    fn test_legacy_flag() {
        let mut req = request();
        req.tools = None;
        let prepared = prepare_tools(&req).unwrap();
        assert!(prepared.legacy);
        assert!(!prepare_tools(&request()).unwrap().legacy);
    }
}
