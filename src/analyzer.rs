//! Usage Analysis Engine
//!
//! Runs the full pipeline over already-discovered sources and returns a
//! structured [`UsageReport`]. Nothing in here reads the environment or
//! formats text; the CLI resolves configuration into [`AnalysisOptions`]
//! and hands the report to the display layer.
//!
//! ## Pipeline
//!
//! 1. **Merge**: per-source batches are concatenated in source order
//! 2. **Deduplication**: one representative per [`crate::models::EntryKey`]
//! 3. **Cost resolution**: every entry gets a final cost under the run's mode
//! 4. **Ordering**: stable sort by timestamp (ties keep source order)
//! 5. **Reduction**: flat aggregation, or block reconstruction followed by
//!    per-block aggregation
//!
//! Every run executes inside an `analysis` span tagged with a fresh
//! `run_id`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use usage_ledger::{AnalysisOptions, FileDiscovery, Granularity, PricingTable, UsageAnalyzer};
//!
//! # fn example() -> anyhow::Result<()> {
//! let discovery = FileDiscovery::resolve(None, &FileDiscovery::default_roots())?;
//! let analyzer = UsageAnalyzer::new(PricingTable::builtin(), AnalysisOptions::default());
//! let report = analyzer.analyze_sources(discovery.find_sources(), Granularity::Daily)?;
//! println!("{} entries", report.summary.entries);
//! # Ok(())
//! # }
//! ```

use crate::aggregator::{AggregateReport, Aggregator, DateRange, Granularity, SortOrder};
use crate::blocks::{
    active_only, idle_gaps, recent, reconstruct, reconstruct_by_session, BlockConfig, BlockProjection,
    BlockScope, BurnRate, IdleGap, SessionBlock, TokenLimit, TokenLimitStatus,
};
use crate::cost::{CostMode, CostResolver, ResolvedUsage, UnknownModelPolicy};
use crate::dedup::DeduplicationEngine;
use crate::error::Result;
use crate::loader::{load_sources, merge_batches, LoadStats};
use crate::models::SourceInfo;
use crate::parser::SourceBatch;
use crate::pricing::PricingTable;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

/// Resolved run settings.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub cost_mode: CostMode,
    pub unknown_model: UnknownModelPolicy,
    pub deduplicate: bool,
    pub blocks: BlockConfig,
    /// `Global` reconstructs one timeline; `Session` partitions by session first.
    pub block_scope: BlockScope,
    pub timezone: Tz,
    pub range: DateRange,
    pub order: SortOrder,
    /// Evaluation instant for active-block detection.
    pub now: DateTime<Utc>,
    pub active_only: bool,
    pub recent_days: Option<i64>,
    pub token_limit: Option<TokenLimit>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            cost_mode: CostMode::default(),
            unknown_model: UnknownModelPolicy::default(),
            deduplicate: true,
            blocks: BlockConfig::default(),
            block_scope: BlockScope::Global,
            timezone: Tz::UTC,
            range: DateRange::default(),
            order: SortOrder::default(),
            now: Utc::now(),
            active_only: false,
            recent_days: None,
            token_limit: None,
        }
    }
}

/// Counts that make partial results observable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    #[serde(flatten)]
    pub load: LoadStats,
    pub duplicates_removed: usize,
    /// Entries after deduplication.
    pub entries: usize,
    pub pricing_unavailable: usize,
    pub uncosted_entries: usize,
    pub unknown_models: Vec<String>,
}

/// A block with its derived rates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetail {
    #[serde(flatten)]
    pub block: SessionBlock,
    pub burn_rate: Option<BurnRate>,
    pub projection: Option<BlockProjection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<TokenLimitStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub run_id: String,
    pub granularity: Granularity,
    pub cost_mode: CostMode,
    pub timezone: String,
    pub aggregate: AggregateReport,
    /// Set for block reports. `session` means one active block per session
    /// is possible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_scope: Option<BlockScope>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<BlockDetail>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub idle_gaps: Vec<IdleGap>,
    pub summary: RunSummary,
}

pub struct UsageAnalyzer {
    pricing: PricingTable,
    options: AnalysisOptions,
}

impl UsageAnalyzer {
    pub fn new(pricing: PricingTable, options: AnalysisOptions) -> Self {
        Self { pricing, options }
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Read `sources` in parallel, then [`run`](Self::run).
    pub fn analyze_sources(&self, sources: Vec<SourceInfo>, granularity: Granularity) -> Result<UsageReport> {
        self.run(load_sources(sources), granularity)
    }

    /// Run the pipeline over already-read batches.
    pub fn run(&self, batches: Vec<SourceBatch>, granularity: Granularity) -> Result<UsageReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("analysis", run_id = %run_id, granularity = %granularity);
        let _enter = span.enter();

        let merged = merge_batches(batches);
        let engine = if self.options.deduplicate {
            DeduplicationEngine::new()
        } else {
            DeduplicationEngine::disabled()
        };
        let deduped = engine.deduplicate(merged.entries);

        let resolver = CostResolver::new(&self.pricing, self.options.cost_mode, self.options.unknown_model);
        let mut resolved = resolver.resolve_all(deduped.entries);
        resolved.sort_by_key(|usage| usage.entry.timestamp);

        let summary = RunSummary {
            load: merged.stats,
            duplicates_removed: deduped.duplicates_removed,
            entries: resolved.len(),
            pricing_unavailable: resolver.pricing_unavailable_count(),
            uncosted_entries: resolved.iter().filter(|usage| usage.cost.is_none()).count(),
            unknown_models: resolver.unknown_models(),
        };

        let aggregator = Aggregator::new(self.options.timezone).with_range(self.options.range);
        let (mut aggregate, mut blocks, gaps) = match granularity {
            Granularity::Daily => (aggregator.daily(&aggregator.filter_entries(resolved)), Vec::new(), Vec::new()),
            Granularity::Monthly => (aggregator.monthly(&aggregator.filter_entries(resolved)), Vec::new(), Vec::new()),
            Granularity::Session => (aggregator.by_session(&aggregator.filter_entries(resolved)), Vec::new(), Vec::new()),
            Granularity::Block => self.block_report(&aggregator, resolved)?,
        };

        aggregate.apply_order(self.options.order);
        if self.options.order == SortOrder::Desc {
            blocks.reverse();
        }

        if summary.load.malformed > 0 || summary.load.unreadable_sources > 0 {
            warn!(
                malformed = summary.load.malformed,
                unreadable_sources = summary.load.unreadable_sources,
                "Some input was skipped"
            );
        }
        info!(
            entries = summary.entries,
            duplicates_removed = summary.duplicates_removed,
            buckets = aggregate.buckets.len(),
            "Analysis complete"
        );

        Ok(UsageReport {
            run_id,
            granularity,
            cost_mode: self.options.cost_mode,
            timezone: self.options.timezone.name().to_string(),
            aggregate,
            block_scope: (granularity == Granularity::Block).then_some(self.options.block_scope),
            blocks,
            idle_gaps: gaps,
            summary,
        })
    }

    fn block_report(
        &self,
        aggregator: &Aggregator,
        resolved: Vec<ResolvedUsage>,
    ) -> Result<(AggregateReport, Vec<BlockDetail>, Vec<IdleGap>)> {
        let options = &self.options;
        let mut blocks = match options.block_scope {
            BlockScope::Global => reconstruct(resolved, &options.blocks, BlockScope::Global, options.now)?,
            BlockScope::Session => reconstruct_by_session(resolved, &options.blocks, options.now)?,
        };
        let gaps = match options.block_scope {
            BlockScope::Global => idle_gaps(&blocks),
            BlockScope::Session => Vec::new(),
        };
        let limit = options.token_limit.and_then(|limit| limit.resolve(&blocks));

        blocks = aggregator.filter_blocks(blocks);
        if options.active_only {
            blocks = active_only(blocks);
        }
        if let Some(days) = options.recent_days {
            blocks = recent(blocks, options.now, days);
        }

        let aggregate = aggregator.by_block(&blocks);
        let details = blocks
            .into_iter()
            .map(|block| {
                let projection = BlockProjection::for_block(&block, options.now);
                let token_limit = match (limit, block.is_active) {
                    (Some(limit), true) => Some(TokenLimitStatus::new(limit, &block, projection.as_ref())),
                    _ => None,
                };
                BlockDetail {
                    burn_rate: BurnRate::for_block(&block),
                    projection,
                    token_limit,
                    block,
                }
            })
            .collect();

        Ok((aggregate, details, gaps))
    }
}
