//! Wire contracts shared between the core services and the HTTP adapter.

pub mod openai;

pub use openai::{
    ChatChoice, ChatChunkChoice, ChatCompletionChunk, ChatCompletionRequest,
    ChatCompletionResponse, ChatDelta, ChatMessage, ContentPart, FinishReason, FunctionCall,
    FunctionCallChoice, FunctionCallMode, FunctionDefinition, FunctionName, ImageUrl,
    MessageContent, NamedToolChoice, ResponseMessage, Role, StopSequences, StreamOptions,
    ToolCall, ToolCallDelta, ToolCallFunctionDelta, ToolChoice, ToolChoiceMode, ToolDefinition,
    Usage,
};
