//! Process-lifetime request counters for `GET /status`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct GatewayStats {
    requests: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    with_tools: AtomicU64,
    tool_calls: AtomicU64,
    tool_fallbacks: AtomicU64,
    required_violations: AtomicU64,
    rate_limited: AtomicU64,
    unauthenticated: AtomicU64,
}

/// Point-in-time copy of [`GatewayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub completed: u64,
    pub failed: u64,
    pub with_tools: u64,
    pub tool_calls: u64,
    pub tool_fallbacks: u64,
    pub required_violations: u64,
    pub rate_limited: u64,
    pub unauthenticated: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl GatewayStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        bump(&self.requests, 1);
    }

    pub fn record_completed(&self) {
        bump(&self.completed, 1);
    }

    pub fn record_failed(&self) {
        bump(&self.failed, 1);
    }

    pub fn record_with_tools(&self) {
        bump(&self.with_tools, 1);
    }

    pub fn record_tool_calls(&self, count: u64) {
        bump(&self.tool_calls, count);
    }

    pub fn record_tool_fallback(&self) {
        bump(&self.tool_fallbacks, 1);
    }

    pub fn record_required_violation(&self) {
        bump(&self.required_violations, 1);
    }

    pub fn record_rate_limited(&self) {
        bump(&self.rate_limited, 1);
    }

    pub fn record_unauthenticated(&self) {
        bump(&self.unauthenticated, 1);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            requests: load(&self.requests),
            completed: load(&self.completed),
            failed: load(&self.failed),
            with_tools: load(&self.with_tools),
            tool_calls: load(&self.tool_calls),
            tool_fallbacks: load(&self.tool_fallbacks),
            required_violations: load(&self.required_violations),
            rate_limited: load(&self.rate_limited),
            unauthenticated: load(&self.unauthenticated),
        }
    }
}
