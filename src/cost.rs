//! Cost Resolver
//!
//! Attaches a final cost to every deduplicated entry under one of three
//! [`CostMode`]s. Pricing misses surface as [`PricingUnavailable`] and are
//! then handled by an explicit [`UnknownModelPolicy`]; a missing rate never
//! turns into a made-up nonzero cost.

use crate::error::PricingUnavailable;
use crate::models::UsageEntry;
use crate::pricing::PricingTable;
use dashmap::DashSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Which cost figure wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Pre-computed cost when present, otherwise computed from tokens.
    #[default]
    Auto,
    /// Always computed from tokens.
    Calculate,
    /// Always the pre-computed cost; absent means zero.
    Display,
}

impl CostMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostMode::Auto => "auto",
            CostMode::Calculate => "calculate",
            CostMode::Display => "display",
        }
    }
}

impl fmt::Display for CostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(CostMode::Auto),
            "calculate" => Ok(CostMode::Calculate),
            "display" => Ok(CostMode::Display),
            other => Err(format!(
                "Invalid cost mode: {other}. Must be one of: auto, calculate, display"
            )),
        }
    }
}

/// What to do with an entry whose model has no rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownModelPolicy {
    /// Cost is zero; a warning is logged once per model.
    #[default]
    Zero,
    /// The entry is kept without a cost figure.
    Omit,
}

impl FromStr for UnknownModelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zero" => Ok(UnknownModelPolicy::Zero),
            "omit" => Ok(UnknownModelPolicy::Omit),
            other => Err(format!(
                "Invalid unknown-model policy: {other}. Must be one of: zero, omit"
            )),
        }
    }
}

/// Where a resolved cost came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CostSource {
    Precomputed,
    Calculated,
    /// Display mode with no pre-computed cost: resolved to exactly zero.
    MissingPrecomputed,
    /// No rate for the model; see [`UnknownModelPolicy`].
    PricingUnavailable,
}

/// An entry with its final cost.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUsage {
    pub entry: UsageEntry,
    /// `None` only under [`UnknownModelPolicy::Omit`].
    pub cost: Option<Decimal>,
    pub mode: CostMode,
    pub cost_source: CostSource,
}

impl ResolvedUsage {
    pub fn cost_or_zero(&self) -> Decimal {
        self.cost.unwrap_or(Decimal::ZERO)
    }
}

pub struct CostResolver<'a> {
    pricing: &'a PricingTable,
    mode: CostMode,
    policy: UnknownModelPolicy,
    warned_models: DashSet<String>,
    unavailable: AtomicUsize,
}

impl<'a> CostResolver<'a> {
    pub fn new(pricing: &'a PricingTable, mode: CostMode, policy: UnknownModelPolicy) -> Self {
        Self {
            pricing,
            mode,
            policy,
            warned_models: DashSet::new(),
            unavailable: AtomicUsize::new(0),
        }
    }

    pub fn mode(&self) -> CostMode {
        self.mode
    }

    /// Apply the cost mode to one entry, reporting pricing misses.
    pub fn compute(&self, entry: &UsageEntry) -> Result<(Decimal, CostSource), PricingUnavailable> {
        match (self.mode, entry.precomputed_cost) {
            (CostMode::Auto, Some(cost)) | (CostMode::Display, Some(cost)) => {
                Ok((cost, CostSource::Precomputed))
            }
            (CostMode::Display, None) => Ok((Decimal::ZERO, CostSource::MissingPrecomputed)),
            (CostMode::Auto, None) | (CostMode::Calculate, _) => {
                let rate = self.pricing.rate_for(&entry.model)?;
                Ok((rate.cost(&entry.tokens), CostSource::Calculated))
            }
        }
    }

    /// Resolve one entry, applying the unknown-model policy on a miss.
    pub fn resolve(&self, entry: UsageEntry) -> ResolvedUsage {
        let (cost, cost_source) = match self.compute(&entry) {
            Ok((cost, source)) => (Some(cost), source),
            Err(unavailable) => {
                self.unavailable.fetch_add(1, Ordering::Relaxed);
                if self.warned_models.insert(unavailable.model.clone()) {
                    warn!(
                        model = %unavailable.model,
                        policy = ?self.policy,
                        "No pricing available for model"
                    );
                }
                let cost = match self.policy {
                    UnknownModelPolicy::Zero => Some(Decimal::ZERO),
                    UnknownModelPolicy::Omit => None,
                };
                (cost, CostSource::PricingUnavailable)
            }
        };

        ResolvedUsage {
            entry,
            cost,
            mode: self.mode,
            cost_source,
        }
    }

    pub fn resolve_all(&self, entries: Vec<UsageEntry>) -> Vec<ResolvedUsage> {
        entries.into_iter().map(|entry| self.resolve(entry)).collect()
    }

    /// Entries that hit a pricing miss so far.
    pub fn pricing_unavailable_count(&self) -> usize {
        self.unavailable.load(Ordering::Relaxed)
    }

    /// Distinct unpriced models, sorted.
    pub fn unknown_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.warned_models.iter().map(|model| model.key().clone()).collect();
        models.sort();
        models
    }
}
