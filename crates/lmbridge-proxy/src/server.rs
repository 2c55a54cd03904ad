//! Router assembly and the serve loop.
//!
//! [`Gateway`] owns the shared state and the shutdown token. `serve` runs
//! axum until the token fires, then gives in-flight requests the configured
//! grace period before returning.

use std::future::IntoFuture;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lmbridge_core::{ChatBackendPort, GatewaySettings, ModelDiscoveryService, SettingsError};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{BearerToken, require_bearer};
use crate::cors::cors;
use crate::error::ApiError;
use crate::handler::chat_completions;
use crate::models::{ModelsResponse, PoolStatus, StatusResponse};
use crate::state::AppState;

/// The OpenAI-compatible gateway.
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    /// Build the gateway. Fails only on invalid settings.
    pub fn new(
        settings: GatewaySettings,
        backend: Arc<dyn ChatBackendPort>,
        shutdown: CancellationToken,
    ) -> Result<Self, SettingsError> {
        Ok(Self {
            state: AppState::new(settings, backend, shutdown)?,
        })
    }

    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    #[must_use]
    pub fn token(&self) -> &BearerToken {
        &self.state.token
    }

    #[must_use]
    pub fn discovery(&self) -> &Arc<ModelDiscoveryService> {
        &self.state.discovery
    }

    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Run one discovery cycle, then keep discovery and health probing going
    /// in the background until shutdown.
    pub async fn start_discovery(&self) -> JoinHandle<()> {
        if let Err(e) = self.state.discovery.discover().await {
            warn!(error = %e, "Initial model discovery failed; will retry in background");
        }
        self.state
            .discovery
            .spawn_background(self.state.shutdown.clone())
    }

    /// Serve on a pre-bound listener until the shutdown token fires.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        serve(listener, self.state).await
    }
}

/// Build the router: routes, then auth, CORS and tracing from the inside out.
pub fn router(state: AppState) -> Router {
    let auth_state = state.clone();
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/v1/models", get(list_models))
        .route("/v1/models/refresh", post(refresh_models))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            require_bearer(auth_state.clone(), req, next)
        }))
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on `listener` until `state.shutdown` fires.
///
/// Once shutdown starts, in-flight handlers answer "shutting down" through
/// their own cancellation; connections still open after the grace period are
/// dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    let grace = state.settings.shutdown_grace();
    info!("Gateway listening on http://{addr}/v1");

    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        () = shutdown.cancelled() => {
            info!(grace_secs = grace.as_secs(), "Draining in-flight requests");
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!("Grace period elapsed, closing remaining connections"),
            }
        }
    }

    info!("Gateway shut down");
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(ModelsResponse::from_snapshot(&state.discovery.snapshot()))
}

/// Forced discovery draws from the same admission budget as completions.
async fn refresh_models(State(state): State<AppState>) -> Response {
    let _permit = match state.admission.try_admit() {
        Ok(permit) => permit,
        Err(err) => {
            state.stats.record_rate_limited();
            warn!(error = %err, "Model refresh rejected by admission control");
            return ApiError(err).into_response();
        }
    };
    match state.discovery.discover().await {
        Ok(snapshot) => Json(ModelsResponse::from_snapshot(&snapshot)).into_response(),
        Err(e) => {
            warn!(error = %e, "Forced model refresh failed");
            ApiError(e.into()).into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.discovery.snapshot();
    Json(StatusResponse {
        status: if state.shutdown.is_cancelled() {
            "draining"
        } else {
            "ok"
        },
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        in_flight: state.admission.in_flight(),
        backend_available: state.availability.last_known().await,
        pool: PoolStatus::from_snapshot(&snapshot),
        stats: state.stats.snapshot(),
    })
}
