//! Core services. Everything here is transport-agnostic.

pub mod availability;
pub mod converter;
pub mod discovery;
pub mod rate_limiter;
pub mod tokens;
pub mod tools;
pub mod validator;

pub use availability::AvailabilityCache;
pub use discovery::{CapabilityHint, DiscoveryConfig, ModelDiscoveryService, PoolSnapshot};
pub use rate_limiter::{
    AdmissionController, AdmissionPermit, Gate, RateDecision, SlidingWindow, TokenBucket,
    UnauthenticatedLimiter,
};
pub use tokens::{estimate_request_tokens, estimate_tokens};
pub use tools::{PreparedTools, prepare_tools};
pub use validator::{
    ValidationLimits, ValidationSummary, correlate_tool_calls, parse_request, validate_request,
};
