//! Cached backend availability.
//!
//! A positive probe is trusted for 60 s, a negative one for 10 s.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ports::ChatBackendPort;

pub const POSITIVE_TTL: Duration = Duration::from_secs(60);
pub const NEGATIVE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct Cached {
    available: bool,
    checked_at: Instant,
}

impl Cached {
    fn is_fresh(self, now: Instant) -> bool {
        let ttl = if self.available {
            POSITIVE_TTL
        } else {
            NEGATIVE_TTL
        };
        now.saturating_duration_since(self.checked_at) < ttl
    }
}

/// Availability probe with asymmetric TTL.
pub struct AvailabilityCache {
    backend: Arc<dyn ChatBackendPort>,
    state: Mutex<Option<Cached>>,
}

impl AvailabilityCache {
    pub fn new(backend: Arc<dyn ChatBackendPort>) -> Self {
        Self {
            backend,
            state: Mutex::new(None),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.is_available_at(Instant::now()).await
    }

    /// Cached result when fresh at `now`, otherwise probe the backend.
    ///
    /// The lock is held across the probe so concurrent callers share it.
    pub async fn is_available_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().await;
        if let Some(cached) = *state {
            if cached.is_fresh(now) {
                return cached.available;
            }
        }

        let available = match self.backend.list_models().await {
            Ok(models) => !models.is_empty(),
            Err(e) => {
                warn!(error = %e, "Backend availability probe failed");
                false
            }
        };
        debug!(available, "Backend availability probed");
        *state = Some(Cached {
            available,
            checked_at: now,
        });
        available
    }

    /// Last known result without probing.
    pub async fn last_known(&self) -> Option<bool> {
        self.state.lock().await.map(|c| c.available)
    }
}

impl std::fmt::Debug for AvailabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityCache").finish_non_exhaustive()
    }
}
