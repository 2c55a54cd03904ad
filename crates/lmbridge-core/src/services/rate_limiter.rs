//! Admission control primitives.
//!
//! Both primitives split the read-only admission check (`peek`) from the
//! state change (`commit` / `consume`), so a request denied by a later gate
//! never debits quota from an earlier one. The `*_at` variants take an
//! explicit instant and are what the tests drive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::GatewayError;
use crate::settings::RateLimitSettings;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Milliseconds until the check could pass; 0 when allowed.
    pub retry_after_ms: u64,
}

impl RateDecision {
    const ALLOW: Self = Self {
        allowed: true,
        retry_after_ms: 0,
    };

    const fn deny(retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            retry_after_ms,
        }
    }
}

// =============================================================================
// Sliding window
// =============================================================================

/// Compaction runs once the dead prefix is at least this long and at least
/// half of the log.
const COMPACT_MIN_DEAD: usize = 64;

/// Sliding-window counter: at most `limit` commits within any `window`.
///
/// The log is append-only; expired entries are skipped by advancing `head`
/// and the dead prefix is dropped in one go once it grows large.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    log: Vec<Instant>,
    head: usize,
}

impl SlidingWindow {
    #[must_use]
    pub const fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            log: Vec::new(),
            head: 0,
        }
    }

    pub fn peek(&mut self) -> RateDecision {
        self.peek_at(Instant::now())
    }

    pub fn commit(&mut self) {
        self.commit_at(Instant::now());
    }

    /// Admission check at `now`. Only skips expired entries.
    pub fn peek_at(&mut self, now: Instant) -> RateDecision {
        self.advance(now);
        if self.live_count() < self.limit {
            return RateDecision::ALLOW;
        }
        let oldest = self.log[self.head];
        let expires_at = oldest + self.window;
        RateDecision::deny(millis_ceil(expires_at.saturating_duration_since(now)))
    }

    /// Record a request at `now`.
    pub fn commit_at(&mut self, now: Instant) {
        self.log.push(now);
    }

    /// Entries currently inside the window (as of the last advance).
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.log.len() - self.head
    }

    fn advance(&mut self, now: Instant) {
        while self.head < self.log.len()
            && now.saturating_duration_since(self.log[self.head]) >= self.window
        {
            self.head += 1;
        }
        if self.head >= COMPACT_MIN_DEAD && self.head * 2 >= self.log.len() {
            self.log.drain(..self.head);
            self.head = 0;
        }
    }
}

// =============================================================================
// Token bucket
// =============================================================================

/// Token bucket refilled continuously from elapsed time.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    /// Tokens per millisecond.
    refill_per_ms: f64,
    tokens: f64,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// A full bucket.
    #[must_use]
    pub fn new(capacity: u32, refill_per_ms: f64) -> Self {
        Self::new_at(capacity, refill_per_ms, Instant::now())
    }

    #[must_use]
    pub fn new_at(capacity: u32, refill_per_ms: f64, now: Instant) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_ms,
            tokens: f64::from(capacity),
            last_refill_at: now,
        }
    }

    /// Bucket refilling `per_sec` tokens each second.
    #[must_use]
    pub fn per_second(capacity: u32, per_sec: u32) -> Self {
        Self::new(capacity, f64::from(per_sec) / 1000.0)
    }

    pub fn peek(&mut self) -> RateDecision {
        self.peek_at(Instant::now())
    }

    pub fn consume(&mut self) {
        self.consume_at(Instant::now());
    }

    /// Refill, then allow when at least one whole token is present.
    pub fn peek_at(&mut self, now: Instant) -> RateDecision {
        self.refill(now);
        if self.tokens >= 1.0 {
            return RateDecision::ALLOW;
        }
        if self.refill_per_ms <= 0.0 {
            return RateDecision::deny(u64::MAX);
        }
        let wait = ((1.0 - self.tokens) / self.refill_per_ms).ceil();
        RateDecision::deny(wait as u64)
    }

    pub fn consume_at(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    #[must_use]
    pub const fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill_at).as_secs_f64() * 1000.0;
        if elapsed_ms > 0.0 {
            self.tokens = elapsed_ms.mul_add(self.refill_per_ms, self.tokens).min(self.capacity);
            self.last_refill_at = now;
        }
    }
}

fn millis_ceil(d: Duration) -> u64 {
    let nanos = d.as_nanos();
    nanos.div_ceil(1_000_000).try_into().unwrap_or(u64::MAX)
}

// =============================================================================
// Multi-tier admission
// =============================================================================

/// Gate that denied admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Concurrency,
    PerMinute,
    PerHour,
    Burst,
}

impl Gate {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Concurrency => "concurrency",
            Self::PerMinute => "per_minute",
            Self::PerHour => "per_hour",
            Self::Burst => "burst",
        }
    }
}

/// Retry hint when the concurrency ceiling is hit.
const CONCURRENCY_RETRY_MS: u64 = 1000;

#[derive(Debug)]
struct Tiers {
    per_minute: SlidingWindow,
    per_hour: SlidingWindow,
    burst: TokenBucket,
}

/// Four gates evaluated in a fixed order: concurrency ceiling, per-minute
/// window, per-hour window, burst bucket. All four are committed only once
/// every gate has passed.
#[derive(Debug)]
pub struct AdmissionController {
    max_concurrent: usize,
    in_flight: Arc<AtomicUsize>,
    tiers: Mutex<Tiers>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self::new_at(settings, Instant::now())
    }

    #[must_use]
    pub fn new_at(settings: &RateLimitSettings, now: Instant) -> Self {
        Self {
            max_concurrent: settings.max_concurrent,
            in_flight: Arc::new(AtomicUsize::new(0)),
            tiers: Mutex::new(Tiers {
                per_minute: SlidingWindow::new(settings.per_minute, Duration::from_secs(60)),
                per_hour: SlidingWindow::new(settings.per_hour, Duration::from_secs(3600)),
                burst: TokenBucket::new_at(
                    settings.burst_capacity,
                    f64::from(settings.burst_refill_per_sec) / 1000.0,
                    now,
                ),
            }),
        }
    }

    pub fn try_admit(&self) -> Result<AdmissionPermit, GatewayError> {
        self.try_admit_at(Instant::now())
    }

    /// Run every gate; on success commit all of them and hand out a permit
    /// that holds one concurrency slot until dropped.
    pub fn try_admit_at(&self, now: Instant) -> Result<AdmissionPermit, GatewayError> {
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);

        if self.in_flight.load(Ordering::Acquire) >= self.max_concurrent {
            return Err(denied(Gate::Concurrency, CONCURRENCY_RETRY_MS));
        }
        let gates = [
            (Gate::PerMinute, tiers.per_minute.peek_at(now)),
            (Gate::PerHour, tiers.per_hour.peek_at(now)),
            (Gate::Burst, tiers.burst.peek_at(now)),
        ];
        if let Some((gate, decision)) = gates.into_iter().find(|(_, d)| !d.allowed) {
            return Err(denied(gate, decision.retry_after_ms));
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        tiers.per_minute.commit_at(now);
        tiers.per_hour.commit_at(now);
        tiers.burst.consume_at(now);

        Ok(AdmissionPermit {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Requests currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

fn denied(gate: Gate, retry_after_ms: u64) -> GatewayError {
    debug!(gate = gate.as_str(), retry_after_ms, "Admission denied");
    GatewayError::RateLimited {
        scope: gate.as_str().to_string(),
        retry_after_ms,
    }
}

/// One concurrency slot; released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Sliding window for requests that fail authentication. Kept apart from the
/// main budget so credential probing cannot drain it.
#[derive(Debug)]
pub struct UnauthenticatedLimiter {
    window: Mutex<SlidingWindow>,
}

impl UnauthenticatedLimiter {
    #[must_use]
    pub const fn new(per_minute: usize) -> Self {
        Self {
            window: Mutex::new(SlidingWindow::new(per_minute, Duration::from_secs(60))),
        }
    }

    /// Check and, when allowed, record one unauthenticated attempt.
    pub fn check(&self) -> RateDecision {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> RateDecision {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let decision = window.peek_at(now);
        if decision.allowed {
            window.commit_at(now);
        }
        decision
    }
}
