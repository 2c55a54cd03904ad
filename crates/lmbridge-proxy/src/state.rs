//! Shared state handed to every route.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lmbridge_core::{
    AdmissionController, AvailabilityCache, ChatBackendPort, DiscoveryConfig, GatewaySettings,
    ModelDiscoveryService, SettingsError, UnauthenticatedLimiter,
};
use tokio_util::sync::CancellationToken;

use crate::auth::BearerToken;
use crate::stats::GatewayStats;

/// Everything a request needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<GatewaySettings>,
    pub backend: Arc<dyn ChatBackendPort>,
    pub discovery: Arc<ModelDiscoveryService>,
    pub admission: Arc<AdmissionController>,
    pub unauthenticated: Arc<UnauthenticatedLimiter>,
    pub availability: Arc<AvailabilityCache>,
    pub stats: Arc<GatewayStats>,
    pub token: Arc<BearerToken>,
    /// Fired when the gateway starts draining.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Validate `settings` and build every shared component.
    ///
    /// Uses the configured API key when set, otherwise a fresh random token.
    pub fn new(
        settings: GatewaySettings,
        backend: Arc<dyn ChatBackendPort>,
        shutdown: CancellationToken,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let token = settings
            .api_key
            .as_deref()
            .map_or_else(BearerToken::generate, BearerToken::new);
        let discovery = ModelDiscoveryService::new(
            Arc::clone(&backend),
            DiscoveryConfig::from_settings(&settings.discovery),
        );

        Ok(Self {
            admission: Arc::new(AdmissionController::new(&settings.rate_limits)),
            unauthenticated: Arc::new(UnauthenticatedLimiter::new(
                settings.rate_limits.unauthenticated_per_minute,
            )),
            availability: Arc::new(AvailabilityCache::new(Arc::clone(&backend))),
            discovery: Arc::new(discovery),
            stats: Arc::new(GatewayStats::new()),
            token: Arc::new(token),
            settings: Arc::new(settings),
            backend,
            shutdown,
            started_at: Utc::now(),
        })
    }
}
