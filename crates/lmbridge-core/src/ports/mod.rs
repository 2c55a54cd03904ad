//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the core domain expects from the host
//! environment. They contain no implementation details and use only domain
//! types.

pub mod chat_backend;

pub use chat_backend::{
    BackendError, BackendErrorCode, BackendFragment, BackendMessage, BackendModelInfo,
    BackendOptions, BackendPart, BackendRequest, BackendResponse, BackendRole, BackendTool,
    BackendToolMode, ChatBackendPort,
};

#[cfg(test)]
pub use chat_backend::MockChatBackendPort;
