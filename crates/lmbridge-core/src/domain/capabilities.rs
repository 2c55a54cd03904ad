//! Model capability records and request capability requirements.
//!
//! Capabilities are populated only by live discovery. Absence of a flag means
//! "not detected", which the router treats the same as "not supported".

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability snapshot for one backend model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    pub id: String,
    pub vendor: String,
    pub family: String,
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub supports_multimodal: bool,
    pub supports_streaming: bool,
    pub is_healthy: bool,
    pub last_probed_at: DateTime<Utc>,
}

impl ModelCapabilities {
    /// Ranking score used to order models inside a pool tier.
    ///
    /// `maxInputTokens/1000 + 50·vision + 30·tools + 20·multimodal + 100·health`
    #[must_use]
    pub fn score(&self) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        f64::from(self.max_input_tokens) / 1000.0
            + 50.0 * flag(self.supports_vision)
            + 30.0 * flag(self.supports_tools)
            + 20.0 * flag(self.supports_multimodal)
            + 100.0 * self.health_score()
    }

    #[must_use]
    pub fn health_score(&self) -> f64 {
        if self.is_healthy { 1.0 } else { 0.0 }
    }

    /// Capabilities this model offers, as tags.
    #[must_use]
    pub fn offered(&self) -> RequiredCapabilities {
        let mut caps = RequiredCapabilities::empty();
        if self.supports_vision {
            caps |= RequiredCapabilities::VISION;
        }
        if self.supports_tools {
            caps |= RequiredCapabilities::TOOLS;
        }
        caps
    }
}

bitflags! {
    /// Capability tags a request needs, derived from its content.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct RequiredCapabilities: u8 {
        /// At least one image part is present.
        const VISION = 0b0000_0001;
        /// Tools are offered or tool calls appear in the history.
        const TOOLS  = 0b0000_0010;
    }
}

impl RequiredCapabilities {
    /// Human readable tag list for logs.
    #[must_use]
    pub fn labels(self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.contains(Self::VISION) {
            labels.push("vision");
        }
        if self.contains(Self::TOOLS) {
            labels.push("tools");
        }
        labels
    }
}
