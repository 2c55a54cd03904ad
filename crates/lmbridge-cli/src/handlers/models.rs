//! `lmbridge models`: one discovery cycle, printed.

use std::sync::Arc;

use lmbridge_core::{ChatBackendPort, DiscoveryConfig, ModelDiscoveryService};
use lmbridge_proxy::models::PoolStatus;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::format_pool;

pub async fn execute(ctx: &CliContext, json: bool) -> Result<(), CliError> {
    let backend: Arc<dyn ChatBackendPort> = ctx.backend.clone();
    let discovery = ModelDiscoveryService::new(
        backend,
        DiscoveryConfig::from_settings(&ctx.settings.discovery),
    );
    let snapshot = discovery.discover().await?;

    if json {
        let status = PoolStatus::from_snapshot(&snapshot);
        let rendered = serde_json::to_string_pretty(&status)
            .map_err(|e| CliError::Server(format!("cannot render pool: {e}")))?;
        println!("{rendered}");
    } else if snapshot.is_empty() {
        println!("No models offered by {}", ctx.backend.base_url());
    } else {
        print!("{}", format_pool(&snapshot));
    }
    Ok(())
}
