//! Deduplication Engine
//!
//! The same logical usage event is frequently mirrored across several log
//! files (resumed sessions, copied project directories, multiple data
//! roots). This module collapses those copies to exactly one representative
//! per [`EntryKey`].
//!
//! ## Strategy
//!
//! - **Single pass**: one `HashMap<EntryKey, usize>` index into the output
//!   vector, O(n) over the merged corpus.
//! - **Tie-break**: a copy carrying a pre-computed cost replaces an earlier
//!   copy without one; otherwise the earliest copy in source order wins.
//! - **Stable output**: survivors keep the position of the first copy seen,
//!   so results do not depend on discovery timing.
//! - **No key, no dedup**: entries without a stable identifier are always
//!   kept.
//!
//! Running the engine over its own output is a no-op.

use crate::models::{EntryKey, UsageEntry};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Result of one deduplication pass.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub entries: Vec<UsageEntry>,
    /// Copies dropped in favour of another representative.
    pub duplicates_removed: usize,
    /// Times a later copy replaced the kept one because it carried a cost.
    pub replaced_for_cost: usize,
}

#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    enabled: bool,
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// An engine that passes entries through untouched.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Collapse duplicates. `entries` must be in the fixed source order.
    pub fn deduplicate(&self, entries: Vec<UsageEntry>) -> DedupOutcome {
        if !self.enabled {
            return DedupOutcome {
                entries,
                ..DedupOutcome::default()
            };
        }

        let mut index: HashMap<EntryKey, usize> = HashMap::with_capacity(entries.len());
        let mut kept: Vec<UsageEntry> = Vec::with_capacity(entries.len());
        let mut outcome = DedupOutcome::default();

        for entry in entries {
            let Some(key) = entry.key() else {
                kept.push(entry);
                continue;
            };

            match index.get(&key) {
                Some(&position) => {
                    outcome.duplicates_removed += 1;
                    let existing = &mut kept[position];
                    if existing.precomputed_cost.is_none() && entry.precomputed_cost.is_some() {
                        trace!(
                            key = %key,
                            file = %entry.provenance.source.path.display(),
                            line = entry.provenance.line,
                            "Replacing duplicate with a copy that carries a cost"
                        );
                        *existing = entry;
                        outcome.replaced_for_cost += 1;
                    } else {
                        trace!(
                            key = %key,
                            file = %entry.provenance.source.path.display(),
                            line = entry.provenance.line,
                            "Skipping duplicate entry"
                        );
                    }
                }
                None => {
                    index.insert(key, kept.len());
                    kept.push(entry);
                }
            }
        }

        debug!(
            kept = kept.len(),
            duplicates_removed = outcome.duplicates_removed,
            replaced_for_cost = outcome.replaced_for_cost,
            "Deduplication finished"
        );

        outcome.entries = kept;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, ModelName, RequestId, SessionId, SourceInfo, SourceProvenance, TokenCounts};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn entry(
        file: &str,
        ids: (Option<&str>, Option<&str>),
        minute: i64,
        cost: Option<Decimal>,
    ) -> UsageEntry {
        UsageEntry {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(minute),
            model: ModelName::new("claude-sonnet-4-20250514").unwrap(),
            session_id: SessionId::new("session").unwrap(),
            message_id: ids.0.map(|id| MessageId::new(id).unwrap()),
            request_id: ids.1.map(|id| RequestId::new(id).unwrap()),
            tokens: TokenCounts::new(100, 50, 0, 0),
            precomputed_cost: cost,
            provenance: SourceProvenance {
                source: Arc::new(SourceInfo::new(file)),
                line: 1,
            },
        }
    }

    #[test]
    fn test_earliest_copy_wins_without_costs() {
        let engine = DeduplicationEngine::new();
        let outcome = engine.deduplicate(vec![
            entry("a.jsonl", (Some("m1"), Some("r1")), 0, None),
            entry("b.jsonl", (Some("m1"), Some("r1")), 0, None),
            entry("b.jsonl", (Some("m2"), Some("r2")), 1, None),
        ]);
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.duplicates_removed, 1);
        assert_eq!(outcome.entries[0].provenance.source.path.to_str(), Some("a.jsonl"));
    }

    #[test]
    fn test_copy_with_cost_is_preferred_and_keeps_position() {
        let engine = DeduplicationEngine::new();
        let outcome = engine.deduplicate(vec![
            entry("a.jsonl", (Some("m1"), Some("r1")), 0, None),
            entry("a.jsonl", (Some("m2"), Some("r2")), 1, None),
            entry("b.jsonl", (Some("m1"), Some("r1")), 0, Some(dec!(0.25))),
            entry("c.jsonl", (Some("m1"), Some("r1")), 0, Some(dec!(0.99))),
        ]);
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.entries[0].precomputed_cost, Some(dec!(0.25)));
        assert_eq!(outcome.replaced_for_cost, 1);
        assert_eq!(outcome.duplicates_removed, 2);
    }

    #[test]
    fn test_entries_without_ids_are_never_merged() {
        let engine = DeduplicationEngine::new();
        let outcome = engine.deduplicate(vec![
            entry("a.jsonl", (None, None), 0, None),
            entry("a.jsonl", (None, None), 0, None),
        ]);
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.duplicates_removed, 0);
    }

    #[test]
    fn test_request_only_keys_include_timestamp() {
        let engine = DeduplicationEngine::new();
        let outcome = engine.deduplicate(vec![
            entry("a.jsonl", (None, Some("r1")), 0, None),
            entry("b.jsonl", (None, Some("r1")), 0, None),
            entry("b.jsonl", (None, Some("r1")), 5, None),
        ]);
        assert_eq!(outcome.entries.len(), 2);
    }

    #[test]
    fn test_deduplication_is_idempotent() {
        let engine = DeduplicationEngine::new();
        let first = engine.deduplicate(vec![
            entry("a.jsonl", (Some("m1"), Some("r1")), 0, None),
            entry("b.jsonl", (Some("m1"), Some("r1")), 0, Some(dec!(1))),
            entry("b.jsonl", (None, None), 3, None),
        ]);
        let second = engine.deduplicate(first.entries.clone());
        assert_eq!(second.entries, first.entries);
        assert_eq!(second.duplicates_removed, 0);
    }

    #[test]
    fn test_disabled_engine_passes_through() {
        let engine = DeduplicationEngine::disabled();
        let outcome = engine.deduplicate(vec![
            entry("a.jsonl", (Some("m1"), Some("r1")), 0, None),
            entry("b.jsonl", (Some("m1"), Some("r1")), 0, None),
        ]);
        assert_eq!(outcome.entries.len(), 2);
    }
}
