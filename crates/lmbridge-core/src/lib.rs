//! Core of the lmbridge gateway.
//!
//! Domain types, the OpenAI wire contracts, the [`ChatBackendPort`] the host
//! environment implements, and the transport-agnostic services the HTTP
//! adapter composes into a request pipeline. Nothing in this crate opens a
//! socket.

pub mod contracts;
pub mod domain;
pub mod error;
pub mod events;
pub mod ports;
pub mod services;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use domain::{ModelCapabilities, ModelPool, RequestContext, RequiredCapabilities, Tier};
pub use error::{ErrorType, GatewayError, ValidationError};
pub use events::{DiscoveryEvent, DiscoveryEvents};
pub use ports::{
    BackendError, BackendErrorCode, BackendFragment, BackendMessage, BackendModelInfo,
    BackendPart, BackendRequest, BackendResponse, BackendRole, BackendTool, BackendToolMode,
    ChatBackendPort,
};
pub use services::{
    AdmissionController, AdmissionPermit, AvailabilityCache, DiscoveryConfig,
    ModelDiscoveryService, PoolSnapshot, PreparedTools, UnauthenticatedLimiter, ValidationLimits,
};
pub use settings::{
    DEFAULT_GATEWAY_PORT, DEFAULT_LARGE_CONTEXT_THRESHOLD, DiscoverySettings, GatewaySettings,
    ImagePolicy, RateLimitSettings, SettingsError,
};
