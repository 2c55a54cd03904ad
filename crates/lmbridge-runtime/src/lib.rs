//! Upstream chat backend for lmbridge.
//!
//! Implements [`lmbridge_core::ChatBackendPort`] against any server speaking
//! the OpenAI chat-completions protocol (llama-server, vLLM, a hosted API).
//! The gateway in `lmbridge-proxy` only ever sees the port; everything that
//! knows about HTTP to the upstream lives here.

#![deny(unsafe_code)]

pub mod upstream;

pub use upstream::{UpstreamBackend, UpstreamConfig, UpstreamError};
