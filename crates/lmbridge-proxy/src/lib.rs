//! OpenAI-compatible HTTP gateway.
//!
//! Exposes `/v1/chat/completions`, `/v1/models`, `/v1/models/refresh`,
//! `/status` and `/health` in front of any [`lmbridge_core::ChatBackendPort`].
//! Requests are authenticated with a bearer token, admitted by the rate
//! limiter, validated, routed to an exact model and translated in both
//! directions by the core services.

#![deny(unsafe_code)]

pub mod auth;
pub mod cors;
pub mod error;
pub mod handler;
pub mod models;
pub mod server;
pub mod sse;
pub mod state;
pub mod stats;

pub use auth::BearerToken;
pub use error::{ApiError, ErrorResponse};
pub use handler::RequestHandler;
pub use server::{Gateway, router, serve};
pub use state::AppState;
pub use stats::{GatewayStats, StatsSnapshot};
