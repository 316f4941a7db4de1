//! Aggregator
//!
//! Reduces resolved entries (or reconstructed blocks) to ordered buckets.
//! Buckets are always built in ascending key order; [`SortOrder`] only
//! changes presentation. The grand total is the sum of the buckets, which
//! equals the sum of every input entry's resolved cost.

use crate::blocks::SessionBlock;
use crate::cost::ResolvedUsage;
use crate::models::{SessionId, TokenCounts};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Summed tokens and cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    #[serde(flatten)]
    pub tokens: TokenCounts,
    pub total_tokens: u64,
    pub cost: Decimal,
    pub entry_count: usize,
    /// Entries kept without a cost figure.
    pub uncosted_entries: usize,
}

impl UsageTotals {
    pub fn add(&mut self, usage: &ResolvedUsage) {
        self.tokens += usage.entry.tokens;
        self.total_tokens = self.tokens.total();
        match usage.cost {
            Some(cost) => self.cost += cost,
            None => self.uncosted_entries += 1,
        }
        self.entry_count += 1;
    }

    pub fn merge(&mut self, other: &UsageTotals) {
        self.tokens += other.tokens;
        self.total_tokens = self.tokens.total();
        self.cost += other.cost;
        self.entry_count += other.entry_count;
        self.uncosted_entries += other.uncosted_entries;
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ResolvedUsage>) -> Self {
        let mut totals = Self::default();
        for usage in entries {
            totals.add(usage);
        }
        totals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
    Session,
    Block,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
            Granularity::Session => "session",
            Granularity::Block => "block",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation order over a canonically ascending report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            other => Err(format!("Invalid sort order: {other}. Must be one of: asc, desc")),
        }
    }
}

/// Granularity-specific bucket identity. Ordering is chronological for
/// dates, months and blocks and lexicographic for sessions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Date(NaiveDate),
    Month { year: i32, month: u32 },
    Session(SessionId),
    Block { start: DateTime<Utc>, id: String },
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            BucketKey::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
            BucketKey::Session(session) => write!(f, "{}", session),
            BucketKey::Block { id, .. } => f.write_str(id),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBucket {
    pub key: BucketKey,
    pub totals: UsageTotals,
    /// Sorted, without the synthetic placeholder model.
    pub models_used: Vec<String>,
    pub model_breakdowns: BTreeMap<String, UsageTotals>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AggregateBucket {
    fn new(key: BucketKey) -> Self {
        Self {
            key,
            totals: UsageTotals::default(),
            models_used: Vec::new(),
            model_breakdowns: BTreeMap::new(),
            last_activity: None,
        }
    }

    fn add(&mut self, usage: &ResolvedUsage) {
        self.totals.add(usage);
        self.model_breakdowns
            .entry(usage.entry.model.to_string())
            .or_default()
            .add(usage);
        let timestamp = usage.entry.timestamp;
        self.last_activity = Some(self.last_activity.map_or(timestamp, |last| last.max(timestamp)));
    }

    fn finish(mut self) -> Self {
        let models: BTreeSet<&String> = self
            .model_breakdowns
            .keys()
            .filter(|model| model.as_str() != crate::models::ModelName::SYNTHETIC)
            .collect();
        self.models_used = models.into_iter().cloned().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub granularity: Granularity,
    /// Ascending by key.
    pub buckets: Vec<AggregateBucket>,
    pub totals: UsageTotals,
}

impl AggregateReport {
    fn from_buckets(granularity: Granularity, buckets: BTreeMap<BucketKey, AggregateBucket>) -> Self {
        let buckets: Vec<AggregateBucket> = buckets.into_values().map(AggregateBucket::finish).collect();
        let mut totals = UsageTotals::default();
        for bucket in &buckets {
            totals.merge(&bucket.totals);
        }
        Self {
            granularity,
            buckets,
            totals,
        }
    }

    /// Buckets in presentation order.
    pub fn ordered(&self, order: SortOrder) -> Vec<&AggregateBucket> {
        match order {
            SortOrder::Asc => self.buckets.iter().collect(),
            SortOrder::Desc => self.buckets.iter().rev().collect(),
        }
    }

    pub fn apply_order(&mut self, order: SortOrder) {
        if order == SortOrder::Desc {
            self.buckets.reverse();
        }
    }
}

/// Inclusive date range in the reporting timezone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        Self { since, until }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.since.map_or(true, |since| date >= since) && self.until.map_or(true, |until| date <= until)
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }
}

/// Parse `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_date_filter(raw: &str) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| format!("Invalid date: {raw}. Use YYYYMMDD or YYYY-MM-DD"))
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    timezone: Tz,
    range: DateRange,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl Aggregator {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            range: DateRange::default(),
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn local_date(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.timezone).date_naive()
    }

    /// Entries whose local date falls inside the configured range.
    pub fn filter_entries(&self, entries: Vec<ResolvedUsage>) -> Vec<ResolvedUsage> {
        if self.range.is_unbounded() {
            return entries;
        }
        entries
            .into_iter()
            .filter(|usage| self.range.contains(self.local_date(usage.entry.timestamp)))
            .collect()
    }

    /// Blocks whose local start date falls inside the configured range.
    pub fn filter_blocks(&self, blocks: Vec<SessionBlock>) -> Vec<SessionBlock> {
        if self.range.is_unbounded() {
            return blocks;
        }
        blocks
            .into_iter()
            .filter(|block| self.range.contains(self.local_date(block.start)))
            .collect()
    }

    pub fn daily(&self, entries: &[ResolvedUsage]) -> AggregateReport {
        self.aggregate_by(entries, Granularity::Daily, |usage| {
            BucketKey::Date(self.local_date(usage.entry.timestamp))
        })
    }

    pub fn monthly(&self, entries: &[ResolvedUsage]) -> AggregateReport {
        self.aggregate_by(entries, Granularity::Monthly, |usage| {
            let date = self.local_date(usage.entry.timestamp);
            BucketKey::Month {
                year: date.year(),
                month: date.month(),
            }
        })
    }

    pub fn by_session(&self, entries: &[ResolvedUsage]) -> AggregateReport {
        self.aggregate_by(entries, Granularity::Session, |usage| {
            BucketKey::Session(usage.entry.session_id.clone())
        })
    }

    /// One bucket per block, summed from the block's member entries.
    pub fn by_block(&self, blocks: &[SessionBlock]) -> AggregateReport {
        let mut buckets = BTreeMap::new();
        for block in blocks {
            let key = BucketKey::Block {
                start: block.start,
                id: block.id.clone(),
            };
            let bucket = buckets
                .entry(key.clone())
                .or_insert_with(|| AggregateBucket::new(key));
            for usage in &block.entries {
                bucket.add(usage);
            }
        }
        AggregateReport::from_buckets(Granularity::Block, buckets)
    }

    fn aggregate_by<F>(&self, entries: &[ResolvedUsage], granularity: Granularity, key_for: F) -> AggregateReport
    where
        F: Fn(&ResolvedUsage) -> BucketKey,
    {
        let mut buckets: BTreeMap<BucketKey, AggregateBucket> = BTreeMap::new();
        for usage in entries {
            let key = key_for(usage);
            buckets
                .entry(key.clone())
                .or_insert_with(|| AggregateBucket::new(key))
                .add(usage);
        }
        AggregateReport::from_buckets(granularity, buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{reconstruct, BlockConfig, BlockScope};
    use crate::cost::{CostMode, CostSource};
    use crate::models::{ModelName, SourceInfo, SourceProvenance, UsageEntry};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn usage(session: &str, model: &str, at: DateTime<Utc>, cost: Option<Decimal>) -> ResolvedUsage {
        ResolvedUsage {
            entry: UsageEntry {
                timestamp: at,
                model: ModelName::new(model).unwrap(),
                session_id: SessionId::new(session).unwrap(),
                request_id: None,
                message_id: None,
                tokens: TokenCounts::new(10, 20, 3, 4),
                precomputed_cost: cost,
                provenance: SourceProvenance {
                    source: Arc::new(SourceInfo::new("a.jsonl")),
                    line: 1,
                },
            },
            cost,
            mode: CostMode::Auto,
            cost_source: CostSource::Precomputed,
        }
    }

    #[test]
    fn test_totals_saturate_on_huge_counts() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut huge = usage("s", "claude-sonnet-4-20250514", at, Some(dec!(1)));
        huge.entry.tokens = TokenCounts::new(u64::MAX - 10, 0, 0, 0);
        let entries = vec![huge.clone(), huge];

        let totals = UsageTotals::from_entries(&entries);
        assert_eq!(totals.tokens.input_tokens, u64::MAX);
        assert_eq!(totals.total_tokens, u64::MAX);
        assert_eq!(totals.cost, dec!(2));
        assert_eq!(totals.entry_count, 2);

        let mut merged = totals;
        merged.merge(&totals);
        assert_eq!(merged.total_tokens, u64::MAX);
        assert_eq!(merged.entry_count, 4);

        let daily = Aggregator::default().daily(&entries);
        assert_eq!(daily.totals.total_tokens, u64::MAX);
    }

    fn corpus() -> Vec<ResolvedUsage> {
        let base = Utc.with_ymd_and_hms(2024, 1, 30, 8, 0, 0).unwrap();
        let costs = [dec!(0.1), dec!(0.2), dec!(0.333), dec!(1.07), dec!(0.0001)];
        let models = ["claude-opus-4-20250514", "claude-sonnet-4-20250514", "<synthetic>"];
        let sessions = ["alpha", "beta", "gamma"];
        (0..60)
            .map(|i: usize| {
                usage(
                    sessions[i % 3],
                    models[i % 3],
                    base + Duration::hours(i as i64 * 3),
                    if i % 11 == 0 { None } else { Some(costs[i % 5]) },
                )
            })
            .collect()
    }

    fn entry_cost_sum(entries: &[ResolvedUsage]) -> Decimal {
        entries.iter().map(ResolvedUsage::cost_or_zero).sum()
    }

    fn bucket_cost_sum(report: &AggregateReport) -> Decimal {
        report.buckets.iter().map(|bucket| bucket.totals.cost).sum()
    }

    #[test]
    fn test_conservation_for_every_granularity() {
        let entries = corpus();
        let expected = entry_cost_sum(&entries);
        let aggregator = Aggregator::default();

        let daily = aggregator.daily(&entries);
        let monthly = aggregator.monthly(&entries);
        let sessions = aggregator.by_session(&entries);
        let blocks = reconstruct(
            entries.clone(),
            &BlockConfig::default(),
            BlockScope::Global,
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let by_block = aggregator.by_block(&blocks);

        for report in [&daily, &monthly, &sessions, &by_block] {
            assert_eq!(bucket_cost_sum(report), expected, "{}", report.granularity);
            assert_eq!(report.totals.cost, expected);
            assert_eq!(report.totals.entry_count, 60);
            assert_eq!(report.totals.uncosted_entries, 6);
            assert_eq!(report.totals.tokens.input_tokens, 600);
        }
        assert_eq!(monthly.buckets.len(), 2);
        assert_eq!(sessions.buckets.len(), 3);
    }

    #[test]
    fn test_buckets_ascend_and_order_is_presentation_only() {
        let entries = corpus();
        let mut report = Aggregator::default().daily(&entries);
        let keys: Vec<_> = report.buckets.iter().map(|bucket| bucket.key.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let descending: Vec<_> = report.ordered(SortOrder::Desc).iter().map(|b| b.key.clone()).collect();
        assert_eq!(descending.first(), keys.last());

        let totals = report.totals;
        report.apply_order(SortOrder::Desc);
        assert_eq!(report.totals, totals);
        assert_eq!(report.buckets.first().map(|b| &b.key), keys.last());
    }

    #[test]
    fn test_reporting_timezone_moves_dates() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let entries = vec![usage("s", "claude-opus-4-20250514", at, Some(dec!(1)))];

        let utc = Aggregator::default().daily(&entries);
        assert_eq!(utc.buckets[0].key.to_string(), "2024-01-01");

        let new_york = Aggregator::new(chrono_tz::America::New_York).monthly(&entries);
        assert_eq!(new_york.buckets[0].key.to_string(), "2023-12");
    }

    #[test]
    fn test_models_used_skip_synthetic_but_breakdowns_do_not() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let entries = vec![
            usage("s", "claude-sonnet-4-20250514", at, Some(dec!(1))),
            usage("s", "<synthetic>", at, Some(dec!(0))),
            usage("s", "claude-opus-4-20250514", at, Some(dec!(2))),
        ];
        let report = Aggregator::default().by_session(&entries);
        let bucket = &report.buckets[0];
        assert_eq!(
            bucket.models_used,
            vec!["claude-opus-4-20250514", "claude-sonnet-4-20250514"]
        );
        assert_eq!(bucket.model_breakdowns.len(), 3);
        assert_eq!(bucket.model_breakdowns["claude-opus-4-20250514"].cost, dec!(2));
        assert_eq!(bucket.last_activity, Some(at));
    }

    #[test]
    fn test_date_range_filter() {
        let entries = corpus();
        let range = DateRange::new(
            Some(parse_date_filter("20240201").unwrap()),
            Some(parse_date_filter("2024-02-02").unwrap()),
        );
        let aggregator = Aggregator::default().with_range(range);
        let report = aggregator.daily(&aggregator.filter_entries(entries));
        assert_eq!(report.buckets.len(), 2);
        assert_eq!(report.buckets[0].key.to_string(), "2024-02-01");
        assert!(parse_date_filter("02/01/2024").is_err());
    }
}
