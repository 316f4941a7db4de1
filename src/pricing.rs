//! Model pricing table.
//!
//! Rates are stored per million tokens as exact decimals. A [`PricingTable`]
//! is fully resolved before cost resolution starts: it is either the
//! built-in catalog, a catalog loaded from disk, or one fetched by
//! [`crate::litellm_pricing`], and is never refreshed mid-run.

use crate::error::PricingUnavailable;
use crate::models::{ModelName, TokenCounts};
use crate::normalizer::decimal_from_number;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Public LiteLLM model price list.
pub const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Tokens per type charged at the base rate before a tier rate applies.
pub const TIER_THRESHOLD: u64 = 200_000;

const PROVIDER_PREFIXES: &[&str] = &["anthropic/", "anthropic.", "claude/"];

// Shorter names are too ambiguous for substring matching.
const MIN_FUZZY_LEN: usize = 8;

/// USD per million tokens, one value per token type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSet {
    pub input: Decimal,
    pub output: Decimal,
    pub cache_write: Decimal,
    pub cache_read: Decimal,
}

impl RateSet {
    pub fn new(input: Decimal, output: Decimal, cache_write: Decimal, cache_read: Decimal) -> Self {
        Self {
            input,
            output,
            cache_write,
            cache_read,
        }
    }
}

/// Pricing for one model, optionally with a higher rate for tokens above
/// [`TIER_THRESHOLD`] within a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRate {
    pub base: RateSet,
    pub above_threshold: Option<RateSet>,
}

impl PricingRate {
    pub fn flat(base: RateSet) -> Self {
        Self {
            base,
            above_threshold: None,
        }
    }

    pub fn tiered(base: RateSet, above_threshold: RateSet) -> Self {
        Self {
            base,
            above_threshold: Some(above_threshold),
        }
    }

    /// Exact cost of `tokens` in USD.
    pub fn cost(&self, tokens: &TokenCounts) -> Decimal {
        let tier = self.above_threshold.as_ref();
        let per_million = self.charge(tokens.input_tokens, self.base.input, tier.map(|t| t.input))
            + self.charge(tokens.output_tokens, self.base.output, tier.map(|t| t.output))
            + self.charge(
                tokens.cache_creation_tokens,
                self.base.cache_write,
                tier.map(|t| t.cache_write),
            )
            + self.charge(
                tokens.cache_read_tokens,
                self.base.cache_read,
                tier.map(|t| t.cache_read),
            );
        per_million / Decimal::from(1_000_000u64)
    }

    fn charge(&self, tokens: u64, base: Decimal, tier: Option<Decimal>) -> Decimal {
        match tier {
            Some(tier) if tokens > TIER_THRESHOLD => {
                Decimal::from(TIER_THRESHOLD) * base + Decimal::from(tokens - TIER_THRESHOLD) * tier
            }
            _ => Decimal::from(tokens) * base,
        }
    }
}

/// Model name to rate mapping with forgiving lookup.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    rates: HashMap<String, PricingRate>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: impl Into<String>, rate: PricingRate) {
        self.rates.insert(model.into(), rate);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Add every model from `other` that this table does not price yet.
    pub fn merge_missing(&mut self, other: &PricingTable) {
        for (model, rate) in &other.rates {
            self.rates.entry(model.clone()).or_insert(*rate);
        }
    }

    /// Find a rate for `model`.
    ///
    /// Order: exact name, provider-prefix variants, then case-insensitive
    /// substring matching (longest catalog key contained in the name, else
    /// the shortest key containing the name). Ties break on key order so
    /// the result never depends on hash iteration.
    pub fn lookup(&self, model: &str) -> Option<&PricingRate> {
        if let Some(rate) = self.rates.get(model) {
            return Some(rate);
        }

        for candidate in prefix_variants(model) {
            if let Some(rate) = self.rates.get(&candidate) {
                return Some(rate);
            }
        }

        self.fuzzy_lookup(model)
    }

    /// Like [`lookup`](Self::lookup) but reports a miss as [`PricingUnavailable`].
    pub fn rate_for(&self, model: &ModelName) -> Result<&PricingRate, PricingUnavailable> {
        self.lookup(model.as_str()).ok_or_else(|| PricingUnavailable {
            model: model.to_string(),
        })
    }

    fn fuzzy_lookup(&self, model: &str) -> Option<&PricingRate> {
        let needle = strip_prefix(&model.to_lowercase()).to_string();
        if needle.len() < MIN_FUZZY_LEN {
            return None;
        }

        let contained = self
            .rates
            .iter()
            .map(|(key, rate)| (strip_prefix(&key.to_lowercase()).to_string(), key, rate))
            .filter(|(key, _, _)| key.len() >= MIN_FUZZY_LEN && needle.contains(key.as_str()))
            .max_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| b.1.cmp(a.1)));
        if let Some((_, key, rate)) = contained {
            debug!(model, matched = %key, "Priced model by catalog key contained in its name");
            return Some(rate);
        }

        let containing = self
            .rates
            .iter()
            .filter(|(key, _)| key.to_lowercase().contains(&needle))
            .min_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(b.0)));
        if let Some((key, rate)) = containing {
            debug!(model, matched = %key, "Priced model by catalog key containing its name");
            return Some(rate);
        }

        None
    }

    /// Parse a LiteLLM style catalog (`model -> { input_cost_per_token, .. }`,
    /// USD per token). Entries without input and output rates are skipped.
    pub fn from_litellm_json(json: &str) -> Result<Self> {
        let catalog: Value = serde_json::from_str(json).context("Pricing catalog is not valid JSON")?;
        let models = catalog
            .as_object()
            .context("Pricing catalog must be a JSON object keyed by model")?;

        let mut table = Self::new();
        for (model, entry) in models {
            if let Some(rate) = litellm_rate(entry) {
                table.insert(model.clone(), rate);
            }
        }

        debug!(models = table.len(), "Parsed pricing catalog");
        Ok(table)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pricing file {}", path.display()))?;
        let table = Self::from_litellm_json(&json)
            .with_context(|| format!("Failed to parse pricing file {}", path.display()))?;
        info!(path = %path.display(), models = table.len(), "Loaded pricing file");
        Ok(table)
    }

    /// Built-in catalog for current Claude models.
    pub fn builtin() -> Self {
        let opus = PricingRate::flat(rates("15", "75", "18.75", "1.5"));
        let sonnet = PricingRate::flat(rates("3", "15", "3.75", "0.3"));
        let sonnet_4 = PricingRate::tiered(rates("3", "15", "3.75", "0.3"), rates("6", "22.5", "7.5", "0.6"));
        let haiku_35 = PricingRate::flat(rates("0.8", "4", "1", "0.08"));
        let haiku_45 = PricingRate::flat(rates("1", "5", "1.25", "0.1"));
        let haiku_3 = PricingRate::flat(rates("0.25", "1.25", "0.3", "0.03"));

        let mut table = Self::new();
        table.insert("claude-opus-4-1-20250805", opus);
        table.insert("claude-opus-4-20250514", opus);
        table.insert("claude-3-opus-20240229", opus);
        table.insert("claude-sonnet-4-5-20250929", sonnet_4);
        table.insert("claude-sonnet-4-20250514", sonnet_4);
        table.insert("claude-3-7-sonnet-20250219", sonnet);
        table.insert("claude-3-5-sonnet-20241022", sonnet);
        table.insert("claude-3-5-sonnet-20240620", sonnet);
        table.insert("claude-haiku-4-5-20251001", haiku_45);
        table.insert("claude-3-5-haiku-20241022", haiku_35);
        table.insert("claude-3-haiku-20240307", haiku_3);
        table
    }
}

fn rates(input: &str, output: &str, cache_write: &str, cache_read: &str) -> RateSet {
    // Literals above are fixed and valid.
    let parse = |value: &str| value.parse::<Decimal>().unwrap_or(Decimal::ZERO);
    RateSet::new(parse(input), parse(output), parse(cache_write), parse(cache_read))
}

fn strip_prefix(model: &str) -> &str {
    PROVIDER_PREFIXES
        .iter()
        .find_map(|prefix| model.strip_prefix(prefix))
        .unwrap_or(model)
}

fn prefix_variants(model: &str) -> Vec<String> {
    let bare = strip_prefix(model);
    let mut variants = Vec::with_capacity(PROVIDER_PREFIXES.len() + 1);
    if bare != model {
        variants.push(bare.to_string());
    }
    for prefix in PROVIDER_PREFIXES {
        let candidate = format!("{prefix}{bare}");
        if candidate != model {
            variants.push(candidate);
        }
    }
    variants
}

fn per_million(entry: &Value, key: &str) -> Option<Decimal> {
    match entry.get(key) {
        Some(Value::Number(number)) => {
            decimal_from_number(number).map(|per_token| (per_token * Decimal::from(1_000_000u64)).normalize())
        }
        _ => None,
    }
}

fn litellm_rate(entry: &Value) -> Option<PricingRate> {
    let input = per_million(entry, "input_cost_per_token")?;
    let output = per_million(entry, "output_cost_per_token")?;
    // Cache traffic is billed at the input rate when the catalog has no cache rates.
    let cache_write = per_million(entry, "cache_creation_input_token_cost").unwrap_or(input);
    let cache_read = per_million(entry, "cache_read_input_token_cost").unwrap_or(input);
    let base = RateSet::new(input, output, cache_write, cache_read);

    let tier_input = per_million(entry, "input_cost_per_token_above_200k_tokens");
    let tier_output = per_million(entry, "output_cost_per_token_above_200k_tokens");
    match (tier_input, tier_output) {
        (Some(tier_input), Some(tier_output)) => {
            let tier = RateSet::new(
                tier_input,
                tier_output,
                per_million(entry, "cache_creation_input_token_cost_above_200k_tokens").unwrap_or(cache_write),
                per_million(entry, "cache_read_input_token_cost_above_200k_tokens").unwrap_or(cache_read),
            );
            Some(PricingRate::tiered(base, tier))
        }
        _ => Some(PricingRate::flat(base)),
    }
}
