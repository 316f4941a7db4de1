//! Source loading and the merge barrier.
//!
//! Sources are independent, so each one is read and normalized on the rayon
//! pool. [`merge_batches`] is the only synchronization point: it concatenates
//! batches in the fixed source order and must complete before deduplication
//! starts.

use crate::models::{SourceInfo, UsageEntry};
use crate::parser::{BatchStats, FileParser, ReadOutcome, SourceBatch};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

/// Totals across all sources of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub sources: usize,
    pub unreadable_sources: usize,
    pub partial_sources: usize,
    pub lines: usize,
    pub ignored: usize,
    pub malformed: usize,
}

/// All normalized entries in source order, before deduplication.
#[derive(Debug, Clone, Default)]
pub struct MergedCorpus {
    pub entries: Vec<UsageEntry>,
    pub stats: LoadStats,
}

/// Read every source in parallel. Output order matches `sources`.
pub fn load_sources(sources: Vec<SourceInfo>) -> Vec<SourceBatch> {
    let parser = FileParser::new();
    let batches: Vec<SourceBatch> = sources
        .into_par_iter()
        .map(|source| parser.parse_source(source))
        .collect();

    info!(sources = batches.len(), "Loaded usage sources");
    batches
}

/// Merge per-source batches, preserving their order.
pub fn merge_batches(batches: Vec<SourceBatch>) -> MergedCorpus {
    let mut stats = LoadStats::default();
    let mut totals = BatchStats::default();
    let capacity = batches.iter().map(|batch| batch.entries.len()).sum();
    let mut entries = Vec::with_capacity(capacity);

    for batch in batches {
        stats.sources += 1;
        match batch.outcome {
            ReadOutcome::Complete => {}
            ReadOutcome::Partial => stats.partial_sources += 1,
            ReadOutcome::Unreadable => stats.unreadable_sources += 1,
        }
        totals += batch.stats;
        entries.extend(batch.entries);
    }

    stats.lines = totals.lines;
    stats.ignored = totals.ignored;
    stats.malformed = totals.malformed;

    MergedCorpus { entries, stats }
}
