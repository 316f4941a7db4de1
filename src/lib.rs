//! Usage Ledger Library
//!
//! Reads the JSONL logs a coding assistant writes under its projects
//! directories and turns them into token and cost reports. Entries are
//! normalized, deduplicated across mirrored directories, priced under a
//! selectable cost mode and then either bucketed by day, month or session,
//! or grouped into fixed-length billing blocks.
//!
//! ## Architecture Overview
//!
//! - [`file_discovery`] - Locates data roots and enumerates `*.jsonl` sources
//! - [`parser`] / [`normalizer`] - Line-by-line reading into [`UsageEntry`] values
//! - [`loader`] - Parallel per-source loading and order-preserving merge
//! - [`dedup`] - One representative per message/request identity
//! - [`pricing`] / [`cost`] - Model rate tables and per-entry cost resolution
//! - [`blocks`] - Billing block reconstruction, burn rate and projections
//! - [`aggregator`] - Daily, monthly, session and block totals
//! - [`analyzer`] - The pipeline tying the stages together
//! - [`display`] - JSON and terminal rendering of a [`UsageReport`]
//! - [`config`] / [`logging`] - TOML + environment configuration and tracing setup
//!
//! ## Main Entry Point
//!
//! ```rust,no_run
//! use usage_ledger::{AnalysisOptions, FileDiscovery, Granularity, PricingTable, UsageAnalyzer};
//!
//! # fn example() -> anyhow::Result<()> {
//! let discovery = FileDiscovery::resolve(None, &FileDiscovery::default_roots())?;
//! let analyzer = UsageAnalyzer::new(PricingTable::builtin(), AnalysisOptions::default());
//! let report = analyzer.analyze_sources(discovery.find_sources(), Granularity::Monthly)?;
//! for bucket in &report.aggregate.buckets {
//!     println!("{}: ${:.2}", bucket.key, bucket.totals.cost);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod analyzer;
pub mod blocks;
pub mod config;
pub mod cost;
pub mod dedup;
pub mod display;
pub mod error;
pub mod file_discovery;
#[cfg(feature = "pricing")]
pub mod litellm_pricing;
pub mod loader;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod parser;
pub mod pricing;

pub use aggregator::{AggregateReport, Aggregator, DateRange, Granularity, SortOrder, UsageTotals};
pub use analyzer::{AnalysisOptions, RunSummary, UsageAnalyzer, UsageReport};
pub use blocks::{BlockConfig, BlockScope, SessionBlock};
pub use config::Config;
pub use cost::{CostMode, CostResolver, UnknownModelPolicy};
pub use dedup::DeduplicationEngine;
pub use error::{AnalysisError, MalformedEntry, PricingUnavailable, ReconstructionError};
pub use file_discovery::FileDiscovery;
pub use models::{TokenCounts, UsageEntry};
pub use pricing::PricingTable;
