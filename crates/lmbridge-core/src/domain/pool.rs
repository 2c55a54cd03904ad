//! Tiered model pool.
//!
//! # Invariant
//!
//! Every model handed to [`ModelPool::build`] lands in exactly one tier, and
//! each tier is sorted non-increasing by [`ModelCapabilities::score`].

use serde::Serialize;

use super::capabilities::ModelCapabilities;

/// Pool tier a model is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Vision and tools.
    Primary,
    /// Tools or a large context window.
    Secondary,
    /// Everything else that is healthy.
    Fallback,
    Unhealthy,
}

impl Tier {
    pub const ALL: [Self; 4] = [Self::Primary, Self::Secondary, Self::Fallback, Self::Unhealthy];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Fallback => "fallback",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Classify a model. `large_context_threshold` is in input tokens.
    #[must_use]
    pub const fn classify(model: &ModelCapabilities, large_context_threshold: u32) -> Self {
        if !model.is_healthy {
            Self::Unhealthy
        } else if model.supports_vision && model.supports_tools {
            Self::Primary
        } else if model.supports_tools || model.max_input_tokens >= large_context_threshold {
            Self::Secondary
        } else {
            Self::Fallback
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four disjoint, ranked buckets of models.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelPool {
    pub primary: Vec<ModelCapabilities>,
    pub secondary: Vec<ModelCapabilities>,
    pub fallback: Vec<ModelCapabilities>,
    pub unhealthy: Vec<ModelCapabilities>,
}

impl ModelPool {
    /// Bucket and rank a discovered model set.
    #[must_use]
    pub fn build(models: Vec<ModelCapabilities>, large_context_threshold: u32) -> Self {
        let mut pool = Self::default();
        for model in models {
            pool.bucket_mut(Tier::classify(&model, large_context_threshold))
                .push(model);
        }
        for tier in Tier::ALL {
            pool.bucket_mut(tier)
                .sort_by(|a, b| b.score().total_cmp(&a.score()));
        }
        pool
    }

    #[must_use]
    pub fn bucket(&self, tier: Tier) -> &[ModelCapabilities] {
        match tier {
            Tier::Primary => &self.primary,
            Tier::Secondary => &self.secondary,
            Tier::Fallback => &self.fallback,
            Tier::Unhealthy => &self.unhealthy,
        }
    }

    fn bucket_mut(&mut self, tier: Tier) -> &mut Vec<ModelCapabilities> {
        match tier {
            Tier::Primary => &mut self.primary,
            Tier::Secondary => &mut self.secondary,
            Tier::Fallback => &mut self.fallback,
            Tier::Unhealthy => &mut self.unhealthy,
        }
    }

    /// All models in tier order, best first.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &ModelCapabilities)> {
        Tier::ALL
            .into_iter()
            .flat_map(move |tier| self.bucket(tier).iter().map(move |m| (tier, m)))
    }

    /// Tier the given model id lives in.
    #[must_use]
    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.iter().find(|(_, m)| m.id == id).map(|(tier, _)| tier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len() + self.fallback.len() + self.unhealthy.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;

    use super::*;

    fn model(id: &str, max_input: u32, vision: bool, tools: bool, healthy: bool) -> ModelCapabilities {
        ModelCapabilities {
            id: id.to_string(),
            vendor: "test".to_string(),
            family: id.to_string(),
            max_input_tokens: max_input,
            max_output_tokens: 4096,
            supports_vision: vision,
            supports_tools: tools,
            supports_multimodal: false,
            supports_streaming: true,
            is_healthy: healthy,
            last_probed_at: Utc::now(),
        }
    }

    fn sample() -> Vec<ModelCapabilities> {
        vec![
            model("vision-tools-small", 8_000, true, true, true),
            model("vision-tools-big", 200_000, true, true, true),
            model("tools-only", 32_000, false, true, true),
            model("long-context", 150_000, false, false, true),
            model("plain-a", 4_000, false, false, true),
            model("plain-b", 16_000, true, false, true),
            model("broken", 500_000, true, true, false),
        ]
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let models = sample();
        let ids: HashSet<String> = models.iter().map(|m| m.id.clone()).collect();
        let pool = ModelPool::build(models, 100_000);

        let mut seen = HashSet::new();
        for (_, m) in pool.iter() {
            assert!(seen.insert(m.id.clone()), "{} appears twice", m.id);
        }
        assert_eq!(seen, ids);
        assert_eq!(pool.len(), 7);
    }

    #[test]
    fn test_tier_assignment() {
        let pool = ModelPool::build(sample(), 100_000);
        assert_eq!(pool.tier_of("vision-tools-big"), Some(Tier::Primary));
        assert_eq!(pool.tier_of("tools-only"), Some(Tier::Secondary));
        assert_eq!(pool.tier_of("long-context"), Some(Tier::Secondary));
        assert_eq!(pool.tier_of("plain-a"), Some(Tier::Fallback));
        // Vision alone does not qualify for primary.
        assert_eq!(pool.tier_of("plain-b"), Some(Tier::Fallback));
        assert_eq!(pool.tier_of("broken"), Some(Tier::Unhealthy));
        assert_eq!(pool.tier_of("missing"), None);
    }

    #[test]
    fn test_buckets_sorted_by_score() {
        let pool = ModelPool::build(sample(), 100_000);
        for tier in Tier::ALL {
            let bucket = pool.bucket(tier);
            for pair in bucket.windows(2) {
                assert!(pair[0].score() >= pair[1].score(), "{tier} not sorted");
            }
        }
        assert_eq!(pool.primary[0].id, "vision-tools-big");
    }
}
