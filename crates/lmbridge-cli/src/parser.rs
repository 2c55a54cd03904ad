//! Main CLI parser and top-level argument handling.
//!
//! Settings come from, in increasing precedence: built-in defaults, the
//! `--config` JSON file, `LMBRIDGE_*` environment variables, then flags.
//! clap merges the last two; [`crate::bootstrap::load_settings`] layers them
//! over the first two.

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::commands::Commands;

/// OpenAI-compatible chat gateway in front of a local model backend.
#[derive(Parser)]
#[command(name = "lmbridge")]
#[command(about = "OpenAI-compatible chat gateway for local model backends")]
#[command(version)]
pub struct Cli {
    /// JSON settings file
    #[arg(long = "config", short = 'c', env = "LMBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Per-invocation overrides for [`lmbridge_core::GatewaySettings`].
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Host to bind to
    #[arg(long, env = "LMBRIDGE_HOST", global = true)]
    pub host: Option<String>,

    /// Port to bind to (0 picks a free port)
    #[arg(long, short = 'p', env = "LMBRIDGE_PORT", global = true)]
    pub port: Option<u16>,

    /// Fixed bearer token (at least 16 characters); random when unset
    #[arg(long, env = "LMBRIDGE_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Per-request deadline in seconds
    #[arg(long, env = "LMBRIDGE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Maximum concurrent chat requests
    #[arg(long, env = "LMBRIDGE_MAX_CONCURRENT", global = true)]
    pub max_concurrent: Option<usize>,

    /// Chat requests allowed per minute
    #[arg(long, env = "LMBRIDGE_PER_MINUTE", global = true)]
    pub per_minute: Option<usize>,

    /// Upstream OpenAI-compatible server
    #[arg(long, env = "LMBRIDGE_UPSTREAM_URL", global = true)]
    pub upstream_url: Option<String>,

    /// Bearer token sent to the upstream server
    #[arg(long, env = "LMBRIDGE_UPSTREAM_KEY", global = true, hide_env_values = true)]
    pub upstream_key: Option<String>,

    /// Context size assumed for upstream models that do not report one
    #[arg(long, env = "LMBRIDGE_UPSTREAM_CONTEXT", global = true)]
    pub upstream_context: Option<u32>,

    /// Ask the upstream's `/tokenize` endpoint for exact prompt counts
    #[arg(long, env = "LMBRIDGE_UPSTREAM_TOKENIZE", global = true)]
    pub upstream_tokenize: bool,
}
