//! Response bodies for the non-chat endpoints.

use chrono::{DateTime, Utc};
use lmbridge_core::{PoolSnapshot, Tier};
use serde::{Deserialize, Serialize};

use crate::stats::StatsSnapshot;

/// Response from `/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelsResponse {
    /// Every model in the pool, best tier first.
    pub fn from_snapshot(snapshot: &PoolSnapshot) -> Self {
        let created = snapshot.refreshed_at.map_or(0, |t| t.timestamp());
        Self {
            object: "list".to_string(),
            data: snapshot
                .pool
                .iter()
                .map(|(_, model)| ModelInfo {
                    id: model.id.clone(),
                    object: "model".to_string(),
                    created,
                    owned_by: model.vendor.clone(),
                })
                .collect(),
        }
    }
}

/// Information about a single model (OpenAI format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Response from `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub in_flight: usize,
    /// Last cached availability probe, if any.
    pub backend_available: Option<bool>,
    pub pool: PoolStatus,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub primary: usize,
    pub secondary: usize,
    pub fallback: usize,
    pub unhealthy: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub models: Vec<ModelStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub id: String,
    pub tier: Tier,
    pub score: f64,
    pub max_input_tokens: u32,
    pub supports_vision: bool,
    pub supports_tools: bool,
}

impl PoolStatus {
    pub fn from_snapshot(snapshot: &PoolSnapshot) -> Self {
        let pool = &snapshot.pool;
        Self {
            primary: pool.bucket(Tier::Primary).len(),
            secondary: pool.bucket(Tier::Secondary).len(),
            fallback: pool.bucket(Tier::Fallback).len(),
            unhealthy: pool.bucket(Tier::Unhealthy).len(),
            refreshed_at: snapshot.refreshed_at,
            models: pool
                .iter()
                .map(|(tier, model)| ModelStatus {
                    id: model.id.clone(),
                    tier,
                    score: model.score(),
                    max_input_tokens: model.max_input_tokens,
                    supports_vision: model.supports_vision,
                    supports_tools: model.supports_tools,
                })
                .collect(),
        }
    }
}
