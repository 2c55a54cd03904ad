//! Domain types: model capabilities, the tiered pool, request context.

pub mod capabilities;
pub mod pool;
pub mod request;

pub use capabilities::{ModelCapabilities, RequiredCapabilities};
pub use pool::{ModelPool, Tier};
pub use request::{RequestContext, required_capabilities};
