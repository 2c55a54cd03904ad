//! Model discovery and tiered routing.
//!
//! Discovery enumerates the backend's models, probes capabilities with a
//! name heuristic, and publishes a [`PoolSnapshot`]. Snapshots are built in
//! full and then swapped in through an [`ArcSwap`], so readers never lock
//! and never observe a half-built pool.
//!
//! The probe is deliberately conservative: every flag starts false and only
//! a hint match turns it on. Unknown model families are therefore routed as
//! plain chat models until a hint is added for them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ModelCapabilities, ModelPool};
use crate::error::GatewayError;
use crate::events::{DiscoveryEvent, DiscoveryEvents};
use crate::ports::{BackendError, BackendModelInfo, ChatBackendPort};
use crate::settings::{DEFAULT_LARGE_CONTEXT_THRESHOLD, DiscoverySettings};

// =============================================================================
// Capability hints
// =============================================================================

/// One entry of a hint list, matched against lowercased model identity.
#[derive(Debug, Clone)]
pub enum CapabilityHint {
    Substring(String),
    Pattern(Regex),
}

impl CapabilityHint {
    #[must_use]
    pub fn matches(&self, identity: &str) -> bool {
        match self {
            Self::Substring(needle) => identity.contains(needle.as_str()),
            Self::Pattern(re) => re.is_match(identity),
        }
    }
}

const VISION_HINTS: &[&str] = &[
    "vision", "gpt-4o", "gpt-4.1", "gpt-5", "claude-3", "claude-sonnet", "claude-opus",
    "gemini", "llava", "pixtral", "minicpm-v", "bakllava",
];
const VISION_PATTERNS: &[&str] = &[r"(^|[-_/ ])vl([-_/ ]|$)", r"qwen[0-9.]*-?vl"];

const TOOL_HINTS: &[&str] = &[
    "gpt-4", "gpt-3.5-turbo", "gpt-5", "claude", "gemini", "mistral", "mixtral", "qwen",
    "hermes", "functionary", "command-r", "granite", "tool",
];
const TOOL_PATTERNS: &[&str] = &[r"llama-?3\.[1-9]", r"(^|[-_/ ])o[134](-|$)"];

const MULTIMODAL_HINTS: &[&str] = &["gpt-4o", "omni", "gemini"];

fn hints(substrings: &[&str], patterns: &[&str]) -> Vec<CapabilityHint> {
    let substrings = substrings
        .iter()
        .map(|s| CapabilityHint::Substring((*s).to_string()));
    let patterns = patterns.iter().filter_map(|p| match Regex::new(p) {
        Ok(re) => Some(CapabilityHint::Pattern(re)),
        Err(e) => {
            warn!(pattern = *p, error = %e, "Skipping invalid capability pattern");
            None
        }
    });
    substrings.chain(patterns).collect()
}

/// Discovery configuration. Replaced wholesale, never mutated in place.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub vision_hints: Vec<CapabilityHint>,
    pub tool_hints: Vec<CapabilityHint>,
    pub multimodal_hints: Vec<CapabilityHint>,
    pub large_context_threshold: u32,
    pub interval: Duration,
    pub health_interval: Duration,
}

impl DiscoveryConfig {
    #[must_use]
    pub fn from_settings(settings: &DiscoverySettings) -> Self {
        Self {
            large_context_threshold: settings.large_context_threshold,
            interval: Duration::from_secs(settings.interval_secs),
            health_interval: Duration::from_secs(settings.health_interval_secs),
            ..Self::default()
        }
    }

    /// Probe one model. Every flag is false unless a hint matches.
    #[must_use]
    pub fn probe(&self, info: &BackendModelInfo, now: DateTime<Utc>) -> ModelCapabilities {
        let identity = format!("{} {} {}", info.id, info.family, info.vendor).to_lowercase();
        let any = |list: &[CapabilityHint]| list.iter().any(|h| h.matches(&identity));

        let supports_vision = any(&self.vision_hints);
        ModelCapabilities {
            id: info.id.clone(),
            vendor: info.vendor.clone(),
            family: info.family.clone(),
            max_input_tokens: info.max_input_tokens,
            max_output_tokens: info.max_output_tokens,
            supports_vision,
            supports_tools: any(&self.tool_hints),
            supports_multimodal: supports_vision && any(&self.multimodal_hints),
            supports_streaming: true,
            is_healthy: true,
            last_probed_at: now,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            vision_hints: hints(VISION_HINTS, VISION_PATTERNS),
            tool_hints: hints(TOOL_HINTS, TOOL_PATTERNS),
            multimodal_hints: hints(MULTIMODAL_HINTS, &[]),
            large_context_threshold: DEFAULT_LARGE_CONTEXT_THRESHOLD,
            interval: Duration::from_secs(300),
            health_interval: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// An immutable, fully built pool plus its id index.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    pub pool: ModelPool,
    by_id: HashMap<String, ModelCapabilities>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl PoolSnapshot {
    #[must_use]
    pub fn build(models: Vec<ModelCapabilities>, threshold: u32, refreshed_at: DateTime<Utc>) -> Self {
        let by_id = models.iter().map(|m| (m.id.clone(), m.clone())).collect();
        Self {
            pool: ModelPool::build(models, threshold),
            by_id,
            refreshed_at: Some(refreshed_at),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelCapabilities> {
        self.by_id.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// =============================================================================
// Service
// =============================================================================

/// Discovers backend models and serves capability lookups.
pub struct ModelDiscoveryService {
    backend: Arc<dyn ChatBackendPort>,
    config: ArcSwap<DiscoveryConfig>,
    snapshot: ArcSwap<PoolSnapshot>,
    events: DiscoveryEvents,
    /// Serializes rebuilds; lookups never take it.
    refresh_lock: Mutex<()>,
}

impl ModelDiscoveryService {
    pub fn new(backend: Arc<dyn ChatBackendPort>, config: DiscoveryConfig) -> Self {
        Self {
            backend,
            config: ArcSwap::from_pointee(config),
            snapshot: ArcSwap::from_pointee(PoolSnapshot::default()),
            events: DiscoveryEvents::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<DiscoveryConfig> {
        self.config.load_full()
    }

    /// Replace the discovery configuration. Takes effect on the next cycle.
    pub fn set_config(&self, config: DiscoveryConfig) {
        self.config.store(Arc::new(config));
    }

    /// Current snapshot. Cheap; holders keep their view across swaps.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        self.snapshot.load_full()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// O(1) lookup by exact id.
    #[must_use]
    pub fn get_model(&self, id: &str) -> Option<ModelCapabilities> {
        self.snapshot.load().get(id).cloned()
    }

    /// Enumerate, probe, rank and swap in a new pool.
    pub async fn discover(&self) -> Result<Arc<PoolSnapshot>, BackendError> {
        let _guard = self.refresh_lock.lock().await;

        let infos = match self.backend.list_models().await {
            Ok(infos) => infos,
            Err(e) => {
                self.events.publish(DiscoveryEvent::DiscoveryFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let config = self.config.load_full();
        let now = Utc::now();
        let models: Vec<ModelCapabilities> = infos.iter().map(|info| config.probe(info, now)).collect();
        let snapshot = Arc::new(PoolSnapshot::build(models, config.large_context_threshold, now));

        self.snapshot.store(Arc::clone(&snapshot));
        info!(
            models = snapshot.pool.len(),
            primary = snapshot.pool.primary.len(),
            secondary = snapshot.pool.secondary.len(),
            fallback = snapshot.pool.fallback.len(),
            "Model pool refreshed"
        );
        self.events.publish(DiscoveryEvent::refreshed(&snapshot.pool));
        Ok(snapshot)
    }

    /// Strict routing: exact id, one forced refresh on miss, never a
    /// substitute.
    pub async fn resolve(&self, id: &str) -> Result<ModelCapabilities, GatewayError> {
        if let Some(model) = self.get_model(id) {
            return healthy_or_unavailable(model);
        }

        debug!(model = %id, "Model not in pool, forcing discovery");
        if let Err(e) = self.discover().await {
            warn!(model = %id, error = %e, "Forced discovery failed");
        }

        match self.get_model(id) {
            Some(model) => healthy_or_unavailable(model),
            None => Err(GatewayError::ModelUnavailable(id.to_string())),
        }
    }

    /// Re-check liveness of already-known models.
    ///
    /// Models no longer listed by the backend are marked unhealthy; a failed
    /// enumeration marks all of them unhealthy. Returns how many flipped.
    pub async fn probe_health(&self) -> Result<usize, BackendError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.snapshot.load_full();
        if current.is_empty() {
            return Ok(0);
        }

        let listed = self.backend.list_models().await;
        let live: Option<Vec<String>> = listed
            .as_ref()
            .ok()
            .map(|infos| infos.iter().map(|i| i.id.clone()).collect());

        let now = Utc::now();
        let mut changed = Vec::new();
        let models: Vec<ModelCapabilities> = current
            .pool
            .iter()
            .map(|(_, model)| {
                let healthy = live.as_ref().is_some_and(|ids| ids.contains(&model.id));
                let mut model = model.clone();
                if model.is_healthy != healthy {
                    changed.push((model.id.clone(), healthy));
                }
                model.is_healthy = healthy;
                model.last_probed_at = now;
                model
            })
            .collect();

        let threshold = self.config.load_full().large_context_threshold;
        let mut snapshot = PoolSnapshot::build(models, threshold, now);
        snapshot.refreshed_at = current.refreshed_at;
        self.snapshot.store(Arc::new(snapshot));

        for (model_id, healthy) in &changed {
            info!(model = %model_id, healthy, "Model health changed");
            self.events.publish(DiscoveryEvent::HealthChanged {
                model_id: model_id.clone(),
                healthy: *healthy,
            });
        }

        match listed {
            Ok(_) => Ok(changed.len()),
            Err(e) => {
                self.events.publish(DiscoveryEvent::DiscoveryFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run the discovery and health cycles until `cancel` fires.
    ///
    /// Both cycles log and swallow failures. The first tick of each is one
    /// full period away; run [`discover`](Self::discover) once at startup.
    pub fn spawn_background(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let config = service.config();
            let start = Instant::now();
            let mut discovery = interval_at(start + config.interval, config.interval);
            let mut health = interval_at(start + config.health_interval, config.health_interval);
            discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);
            health.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Discovery cycles stopped");
                        break;
                    }
                    _ = discovery.tick() => {
                        if let Err(e) = service.discover().await {
                            warn!(error = %e, "Background discovery failed");
                        }
                    }
                    _ = health.tick() => {
                        if let Err(e) = service.probe_health().await {
                            warn!(error = %e, "Background health probe failed");
                        }
                    }
                }
            }
        })
    }
}

fn healthy_or_unavailable(model: ModelCapabilities) -> Result<ModelCapabilities, GatewayError> {
    if model.is_healthy {
        Ok(model)
    } else {
        Err(GatewayError::ModelUnavailable(model.id))
    }
}

impl std::fmt::Debug for ModelDiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDiscoveryService")
            .field("models", &self.snapshot.load().len())
            .finish_non_exhaustive()
    }
}
