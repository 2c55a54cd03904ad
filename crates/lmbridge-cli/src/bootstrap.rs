//! CLI bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together for
//! the binary: settings are resolved, logging is initialised and the
//! concrete upstream backend is built. Command handlers receive the composed
//! [`CliContext`].

use std::path::Path;
use std::sync::Arc;

use lmbridge_core::GatewaySettings;
use lmbridge_runtime::{UpstreamBackend, UpstreamConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;
use crate::parser::{Cli, SettingsArgs};

/// Fully composed context for CLI commands.
pub struct CliContext {
    pub settings: GatewaySettings,
    pub backend: Arc<UpstreamBackend>,
}

/// Initialise the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}

/// Resolve settings: defaults, then the JSON file, then env/flags.
pub fn load_settings(config: Option<&Path>, args: &SettingsArgs) -> Result<GatewaySettings, CliError> {
    let mut settings = match config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| CliError::Config(format!("invalid settings in {}: {e}", path.display())))?
        }
        None => GatewaySettings::default(),
    };

    if let Some(host) = &args.host {
        settings.host.clone_from(host);
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(key) = &args.api_key {
        settings.api_key = Some(key.clone());
    }
    if let Some(timeout) = args.timeout {
        settings.request_timeout_secs = timeout;
    }
    if let Some(max) = args.max_concurrent {
        settings.rate_limits.max_concurrent = max;
    }
    if let Some(per_minute) = args.per_minute {
        settings.rate_limits.per_minute = per_minute;
    }
    if let Some(url) = &args.upstream_url {
        settings.upstream_url.clone_from(url);
    }
    if let Some(context) = args.upstream_context {
        settings.upstream_default_context = context;
    }

    settings.validate()?;
    Ok(settings)
}

/// Upstream connection settings for the resolved gateway settings.
pub fn upstream_config(settings: &GatewaySettings, args: &SettingsArgs) -> UpstreamConfig {
    UpstreamConfig {
        api_key: args.upstream_key.clone(),
        tokenize: args.upstream_tokenize,
        ..UpstreamConfig::from_settings(settings)
    }
}

/// Bootstrap the CLI application.
pub fn bootstrap(cli: &Cli) -> Result<CliContext, CliError> {
    let settings = load_settings(cli.config.as_deref(), &cli.settings)?;
    let backend = UpstreamBackend::new(upstream_config(&settings, &cli.settings))?;
    debug!(upstream = %backend.base_url(), "Upstream backend configured");
    Ok(CliContext {
        settings,
        backend: Arc::new(backend),
    })
}
