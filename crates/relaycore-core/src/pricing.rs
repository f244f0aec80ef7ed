// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: Apache-2.0

//! Per-model pricing table, loaded from configuration at startup and shared
//! across provider instances.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new(entries: HashMap<String, ModelPricing>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.entries.insert(model.into(), pricing);
    }

    /// `cost = (prompt_tokens/1000)*prompt_per_1k + (completion_tokens/1000)*completion_per_1k`,
    /// rounded to 6 decimal places. Falls back to the cheapest entry in the
    /// same model family (everything before the first digit in the name) if
    /// the exact model isn't priced.
    pub fn cost(&self, model: &str, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        let pricing = self.entries.get(model).copied().unwrap_or_else(|| {
            let fallback = self.cheapest_in_family(model);
            warn!(model, "no pricing entry for model, using family fallback");
            fallback.unwrap_or(ModelPricing {
                prompt_per_1k: 0.0,
                completion_per_1k: 0.0,
            })
        });

        let raw = (prompt_tokens as f64 / 1000.0) * pricing.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * pricing.completion_per_1k;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }

    fn cheapest_in_family(&self, model: &str) -> Option<ModelPricing> {
        let family = model_family(model);
        self.entries
            .iter()
            .filter(|(name, _)| model_family(name) == family)
            .map(|(_, pricing)| *pricing)
            .min_by(|a, b| {
                let total_a = a.prompt_per_1k + a.completion_per_1k;
                let total_b = b.prompt_per_1k + b.completion_per_1k;
                total_a.partial_cmp(&total_b).unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

fn model_family(model: &str) -> &str {
    let prefix = model
        .split(|c: char| c.is_ascii_digit())
        .next()
        .unwrap_or(model);
    prefix.trim_end_matches('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PricingTable {
        let mut t = PricingTable::default();
        t.insert(
            "gpt-4",
            ModelPricing {
                prompt_per_1k: 0.03,
                completion_per_1k: 0.06,
            },
        );
        t.insert(
            "gpt-3.5-turbo",
            ModelPricing {
                prompt_per_1k: 0.0005,
                completion_per_1k: 0.0015,
            },
        );
        t
    }

    #[test]
    fn computes_exact_cost() {
        let t = table();
        // 3 prompt tokens, 1 completion token on gpt-3.5-turbo
        let cost = t.cost("gpt-3.5-turbo", 3, 1);
        assert!((cost - 0.0000035).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_cheapest_family_member() {
        let t = table();
        let cost = t.cost("gpt-4-turbo-preview", 1000, 1000);
        // falls back to gpt-3.5-turbo, the cheaper "gpt" family member
        let expected = t.cost("gpt-3.5-turbo", 1000, 1000);
        assert_eq!(cost, expected);
    }

    #[test]
    fn unknown_family_is_zero_cost() {
        let t = table();
        assert_eq!(t.cost("mystery-model", 100, 100), 0.0);
    }
}
