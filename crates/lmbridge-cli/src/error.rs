//! CLI-specific error types and exit codes.

use lmbridge_core::{BackendError, SettingsError};
use lmbridge_runtime::UpstreamError;
use thiserror::Error;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Settings file unreadable or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings out of range.
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// IO error (bind failure, file not found, etc.).
    #[error("IO error: {0}")]
    Io(String),

    /// The upstream backend failed a request.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The upstream backend is not reachable or offers no models.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Server loop failure.
    #[error("{0}")]
    Server(String),
}

impl CliError {
    /// Map error to a sysexits-style exit code.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Settings(_) => 78, // EX_CONFIG
            Self::Io(_) => 74,                          // EX_IOERR
            Self::Backend(_) => 1,
            Self::Unavailable(_) => 69, // EX_UNAVAILABLE
            Self::Server(_) => 70,      // EX_SOFTWARE
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<BackendError> for CliError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<UpstreamError> for CliError {
    fn from(err: UpstreamError) -> Self {
        Self::Config(err.to_string())
    }
}
