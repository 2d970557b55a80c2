//! Model pricing lookup
//!
//! Prices are owned by configuration: [`PricingTable::default`] ships the published
//! Claude list prices and a config file can replace or extend them. Nothing here
//! touches the network.

use crate::models::TokenCounts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// USD prices per million tokens for a single model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    #[serde(default)]
    pub cache_write_per_million: f64,
    #[serde(default)]
    pub cache_read_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64, cache_write: f64, cache_read: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            cache_write_per_million: cache_write,
            cache_read_per_million: cache_read,
        }
    }

    pub fn cost(&self, tokens: &TokenCounts) -> f64 {
        (tokens.input_tokens as f64 * self.input_per_million
            + tokens.output_tokens as f64 * self.output_per_million
            + tokens.cache_creation_input_tokens as f64 * self.cache_write_per_million
            + tokens.cache_read_input_tokens as f64 * self.cache_read_per_million)
            / 1_000_000.0
    }
}

/// Pricing keyed by model name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub models: BTreeMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = BTreeMap::new();

        let opus_legacy = ModelPricing::new(15.0, 75.0, 18.75, 1.5);
        let sonnet = ModelPricing::new(3.0, 15.0, 3.75, 0.3);

        models.insert("claude-opus-4".to_string(), opus_legacy);
        models.insert("claude-opus-4-1".to_string(), opus_legacy);
        models.insert("claude-opus-4-5".to_string(), ModelPricing::new(5.0, 25.0, 6.25, 0.5));
        models.insert("claude-3-opus".to_string(), opus_legacy);
        models.insert("claude-sonnet-4".to_string(), sonnet);
        models.insert("claude-sonnet-4-5".to_string(), sonnet);
        models.insert("claude-3-7-sonnet".to_string(), sonnet);
        models.insert("claude-3-5-sonnet".to_string(), sonnet);
        models.insert("claude-haiku-4-5".to_string(), ModelPricing::new(1.0, 5.0, 1.25, 0.1));
        models.insert("claude-3-5-haiku".to_string(), ModelPricing::new(0.8, 4.0, 1.0, 0.08));
        models.insert("claude-3-haiku".to_string(), ModelPricing::new(0.25, 1.25, 0.3, 0.03));

        Self { models }
    }
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }

    /// Find pricing for a model name as written in the logs
    ///
    /// Tries the exact name, then the name without provider prefix and release date,
    /// then the longest configured name the normalized model starts with.
    pub fn lookup(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.models.get(model) {
            return Some(pricing);
        }

        let normalized = normalize_model_name(model);
        if let Some(pricing) = self.models.get(&normalized) {
            return Some(pricing);
        }

        self.models
            .iter()
            .filter(|(name, _)| normalized.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, pricing)| pricing)
    }

    /// Cost of the given tokens, zero for unknown models
    pub fn cost_for(&self, model: &str, tokens: &TokenCounts) -> f64 {
        match self.lookup(model) {
            Some(pricing) => pricing.cost(tokens),
            None => {
                debug!(model = %model, "No pricing for model, costing at zero");
                0.0
            }
        }
    }
}

/// Lowercase, drop provider prefixes and a trailing `-YYYYMMDD` release date
pub fn normalize_model_name(model: &str) -> String {
    let mut name = model.trim().to_lowercase();

    for prefix in ["anthropic/", "anthropic.", "bedrock/", "vertex_ai/", "openrouter/"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest.to_string();
        }
    }

    if let Some(at) = name.find('@') {
        name.truncate(at);
    }
    if let Some(colon) = name.find(':') {
        name.truncate(colon);
    }

    if let Some((head, tail)) = name.rsplit_once('-') {
        if tail.len() == 8 && tail.chars().all(|c| c.is_ascii_digit()) {
            name = head.to_string();
        }
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: u64, output: u64, write: u64, read: u64) -> TokenCounts {
        TokenCounts {
            input_tokens: input,
            output_tokens: output,
            cache_creation_input_tokens: write,
            cache_read_input_tokens: read,
        }
    }

    #[test]
    fn test_opus_cost() {
        let table = PricingTable::default();
        let cost = table.cost_for("claude-opus-4", &tokens(1000, 500, 0, 0));
        assert!((cost - 0.0525).abs() < 1e-12);
    }

    #[test]
    fn test_cache_tokens_priced() {
        let table = PricingTable::default();
        let cost = table.cost_for("claude-sonnet-4", &tokens(0, 0, 1_000_000, 1_000_000));
        assert!((cost - 4.05).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_strips_release_date() {
        let table = PricingTable::default();
        assert_eq!(
            table.lookup("claude-sonnet-4-20250514"),
            table.lookup("claude-sonnet-4")
        );
        assert_eq!(
            table.lookup("claude-opus-4-1-20250805").map(|p| p.input_per_million),
            Some(15.0)
        );
    }

    #[test]
    fn test_lookup_prefers_longest_prefix() {
        let table = PricingTable::default();
        let pricing = table.lookup("claude-opus-4-5-preview").unwrap();
        assert_eq!(pricing.input_per_million, 5.0);
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let table = PricingTable::default();
        assert_eq!(table.cost_for("gpt-4o", &tokens(1000, 1000, 0, 0)), 0.0);
        assert!(table.lookup("unknown").is_none());
    }

    #[test]
    fn test_normalize_model_name() {
        assert_eq!(normalize_model_name("anthropic/claude-3-5-haiku-20241022"), "claude-3-5-haiku");
        assert_eq!(normalize_model_name("claude-sonnet-4@20250514"), "claude-sonnet-4");
        assert_eq!(normalize_model_name("Claude-Opus-4"), "claude-opus-4");
    }
}
