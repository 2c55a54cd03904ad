//! Command handlers.
//!
//! Handlers follow the canonical pattern:
//! - Signature: `pub async fn execute(ctx, ...) -> Result<(), CliError>`
//! - Thin wrappers that call into the gateway or core services and format
//!   output for the terminal.

pub mod check;
pub mod models;
pub mod serve;
