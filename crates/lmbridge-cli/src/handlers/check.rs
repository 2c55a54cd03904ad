//! `lmbridge check`: is the upstream reachable and serving models?

use lmbridge_core::ChatBackendPort;

use crate::bootstrap::CliContext;
use crate::error::CliError;

pub async fn execute(ctx: &CliContext) -> Result<(), CliError> {
    let url = ctx.backend.base_url();
    let models = ctx
        .backend
        .list_models()
        .await
        .map_err(|e| CliError::Unavailable(format!("{url}: {e}")))?;

    if models.is_empty() {
        return Err(CliError::Unavailable(format!("{url} offers no models")));
    }

    println!("✓ Upstream {url} is available ({} models)", models.len());
    for model in &models {
        println!("  {} ({} input tokens)", model.id, model.max_input_tokens);
    }
    Ok(())
}
