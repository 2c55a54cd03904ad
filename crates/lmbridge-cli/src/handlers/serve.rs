//! `lmbridge serve`: run the gateway until Ctrl-C.

use std::sync::Arc;

use lmbridge_core::{ChatBackendPort, DiscoveryEvent};
use lmbridge_proxy::Gateway;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::CliContext;
use crate::error::CliError;

pub async fn execute(ctx: CliContext) -> Result<(), CliError> {
    let shutdown = CancellationToken::new();
    let generated_key = ctx.settings.api_key.is_none();
    let bind_addr = format!("{}:{}", ctx.settings.host, ctx.settings.port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| CliError::Io(format!("cannot bind {bind_addr}: {e}")))?;
    let local_addr = listener.local_addr()?;

    let backend: Arc<dyn ChatBackendPort> = ctx.backend;
    let gateway = Gateway::new(ctx.settings, backend, shutdown.clone())?;

    // Subscribe before the first discovery so its result is logged too.
    let events = spawn_event_logger(gateway.discovery().subscribe(), shutdown.clone());
    let discovery = gateway.start_discovery().await;

    println!();
    println!("  lmbridge gateway listening on http://{local_addr}/v1");
    if generated_key {
        println!("  API key (generated for this run): {}", gateway.token().as_str());
    } else {
        println!("  API key: {}...", gateway.token().prefix());
    }
    println!("  Press Ctrl-C to stop");
    println!();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    let served = gateway.serve(listener).await;
    shutdown.cancel();
    let _ = discovery.await;
    let _ = events.await;
    served.map_err(|e| CliError::Server(e.to_string()))
}

fn spawn_event_logger(
    mut events: broadcast::Receiver<DiscoveryEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Discovery event log lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn log_event(event: &DiscoveryEvent) {
    match event {
        DiscoveryEvent::PoolRefreshed {
            total,
            primary,
            secondary,
            fallback,
            unhealthy,
        } => info!(total, primary, secondary, fallback, unhealthy, "Model pool updated"),
        DiscoveryEvent::DiscoveryFailed { message } => {
            warn!(error = %message, "Model discovery failed");
        }
        DiscoveryEvent::HealthChanged { model_id, healthy: true } => {
            info!(model = %model_id, "Model healthy again");
        }
        DiscoveryEvent::HealthChanged { model_id, healthy: false } => {
            warn!(model = %model_id, "Model marked unhealthy");
        }
    }
}
