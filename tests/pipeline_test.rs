//! End-to-end pipeline tests over temporary data roots

mod common;

use chrono::{TimeZone, Utc};
use common::{DataRoot, Line};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use usage_ledger::aggregator::{DateRange, Granularity, SortOrder, UsageTotals};
use usage_ledger::cost::{CostMode, UnknownModelPolicy};
use usage_ledger::pricing::{PricingRate, RateSet};
use usage_ledger::{AnalysisOptions, FileDiscovery, PricingTable, UsageAnalyzer, UsageReport};

fn analyze(roots: &[&DataRoot], options: AnalysisOptions, granularity: Granularity) -> UsageReport {
    let joined = roots
        .iter()
        .map(|root| root.path().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(",");
    let discovery = FileDiscovery::resolve(Some(&joined), &[]).unwrap();
    UsageAnalyzer::new(PricingTable::builtin(), options)
        .analyze_sources(discovery.find_sources(), granularity)
        .unwrap()
}

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn options() -> AnalysisOptions {
    AnalysisOptions {
        now: fixed_now(),
        ..AnalysisOptions::default()
    }
}

fn sum_buckets(report: &UsageReport) -> UsageTotals {
    let mut sum = UsageTotals::default();
    for bucket in &report.aggregate.buckets {
        sum.merge(&bucket.totals);
    }
    sum
}

#[test]
fn test_malformed_line_is_counted_not_fatal() {
    let root = DataRoot::new();
    let mut lines: Vec<String> = (0..100)
        .map(|i| {
            Line::new(&format!("2024-05-01T10:{:02}:{:02}Z", i / 60, i % 60))
                .ids(&format!("msg_{i}"), &format!("req_{i}"))
                .render()
        })
        .collect();
    lines.insert(50, "{not valid json".to_string());
    root.write_session("proj", "session-1", &lines);

    let report = analyze(&[&root], options(), Granularity::Daily);
    assert_eq!(report.summary.entries, 100);
    assert_eq!(report.summary.load.malformed, 1);
    assert_eq!(report.summary.load.sources, 1);
    assert_eq!(report.aggregate.totals.entry_count, 100);
    assert_eq!(report.aggregate.totals.tokens.input_tokens, 100 * 100);
}

#[test]
fn test_totals_are_conserved_across_granularities() {
    let root = DataRoot::new();
    root.write_session(
        "alpha",
        "s1",
        &[
            Line::new("2024-04-30T09:00:00Z").session("s1").cost(0.25).render(),
            Line::new("2024-05-01T10:00:00Z").session("s1").tokens(1000, 400).render(),
            Line::new("2024-05-01T18:30:00Z").session("s1").cache(300, 700).render(),
        ],
    );
    root.write_session(
        "beta",
        "s2",
        &[
            Line::new("2024-05-01T11:00:00Z").session("s2").model("claude-3-opus-20240229").render(),
            Line::new("2024-05-03T08:15:00Z").session("s2").cost(1.5).render(),
        ],
    );

    let daily = analyze(&[&root], options(), Granularity::Daily);
    let expected = daily.aggregate.totals;
    assert_eq!(expected.entry_count, 5);
    assert_eq!(daily.aggregate.buckets.len(), 3);

    for granularity in [
        Granularity::Daily,
        Granularity::Monthly,
        Granularity::Session,
        Granularity::Block,
    ] {
        let report = analyze(&[&root], options(), granularity);
        assert_eq!(report.aggregate.totals, expected, "{granularity} totals");
        assert_eq!(sum_buckets(&report), expected, "{granularity} bucket sum");
    }

    let blocks = analyze(&[&root], options(), Granularity::Block);
    let entries_in_blocks: usize = blocks.blocks.iter().map(|b| b.block.totals.entry_count).sum();
    assert_eq!(entries_in_blocks, 5);
}

#[test]
fn test_duplicates_across_mirrored_roots_count_once() {
    let first = DataRoot::new();
    let second = DataRoot::new();
    let lines = vec![
        Line::new("2024-05-01T10:00:00Z").ids("msg_1", "req_1").cost(0.5).render(),
        Line::new("2024-05-01T10:05:00Z").ids("msg_2", "req_2").cost(0.5).render(),
    ];
    first.write_session("proj", "session-1", &lines);
    second.write_session("proj", "session-1", &lines);

    let report = analyze(&[&first, &second], options(), Granularity::Daily);
    assert_eq!(report.summary.load.sources, 2);
    assert_eq!(report.summary.duplicates_removed, 2);
    assert_eq!(report.summary.entries, 2);
    assert_eq!(report.aggregate.totals.cost, dec!(1.0));

    let undeduplicated = AnalysisOptions {
        deduplicate: false,
        ..options()
    };
    let report = analyze(&[&first, &second], undeduplicated, Granularity::Daily);
    assert_eq!(report.summary.entries, 4);
}

#[test]
fn test_cost_modes_end_to_end() {
    let root = DataRoot::new();
    root.write_session(
        "proj",
        "session-1",
        &[Line::new("2024-05-01T10:00:00Z")
            .model("claude-ledger-test-model")
            .tokens(1_000_000, 0)
            .cost(5.0)
            .render()],
    );
    let discovery = FileDiscovery::resolve(Some(&root.path().to_string_lossy()), &[]).unwrap();

    let mut pricing = PricingTable::new();
    pricing.insert(
        "claude-ledger-test-model",
        PricingRate::flat(RateSet::new(dec!(7), dec!(0), dec!(0), dec!(0))),
    );

    let cost_for = |mode: CostMode| {
        let options = AnalysisOptions {
            cost_mode: mode,
            ..options()
        };
        UsageAnalyzer::new(pricing.clone(), options)
            .analyze_sources(discovery.find_sources(), Granularity::Daily)
            .unwrap()
            .aggregate
            .totals
            .cost
    };

    assert_eq!(cost_for(CostMode::Auto), dec!(5));
    assert_eq!(cost_for(CostMode::Display), dec!(5));
    assert_eq!(cost_for(CostMode::Calculate), dec!(7));
}

#[test]
fn test_unknown_model_is_reported() {
    let root = DataRoot::new();
    root.write_session(
        "proj",
        "session-1",
        &[
            Line::new("2024-05-01T10:00:00Z").model("mystery-model-9000").render(),
            Line::new("2024-05-01T10:01:00Z").render(),
        ],
    );

    let omit = AnalysisOptions {
        cost_mode: CostMode::Calculate,
        unknown_model: UnknownModelPolicy::Omit,
        ..options()
    };
    let report = analyze(&[&root], omit, Granularity::Daily);
    assert_eq!(report.summary.pricing_unavailable, 1);
    assert_eq!(report.summary.unknown_models, vec!["mystery-model-9000".to_string()]);
    assert_eq!(report.aggregate.totals.uncosted_entries, 1);
    assert!(report.aggregate.totals.cost > Decimal::ZERO);
}

#[test]
fn test_daily_buckets_follow_timezone() {
    let root = DataRoot::new();
    root.write_session(
        "proj",
        "session-1",
        &[
            Line::new("2024-05-01T23:30:00Z").render(),
            Line::new("2024-05-02T03:00:00Z").render(),
        ],
    );

    let utc = analyze(&[&root], options(), Granularity::Daily);
    assert_eq!(utc.aggregate.buckets.len(), 2);

    let new_york = AnalysisOptions {
        timezone: chrono_tz::America::New_York,
        ..options()
    };
    let local = analyze(&[&root], new_york, Granularity::Daily);
    assert_eq!(local.aggregate.buckets.len(), 1);
    assert_eq!(local.aggregate.buckets[0].key.to_string(), "2024-05-01");
}

#[test]
fn test_date_range_and_order() {
    let root = DataRoot::new();
    root.write_session(
        "proj",
        "session-1",
        &[
            Line::new("2024-05-01T10:00:00Z").render(),
            Line::new("2024-05-02T10:00:00Z").render(),
            Line::new("2024-05-03T10:00:00Z").render(),
        ],
    );

    let filtered = AnalysisOptions {
        range: DateRange::new(
            chrono::NaiveDate::from_ymd_opt(2024, 5, 2),
            chrono::NaiveDate::from_ymd_opt(2024, 5, 3),
        ),
        order: SortOrder::Desc,
        ..options()
    };
    let report = analyze(&[&root], filtered, Granularity::Daily);
    let keys: Vec<String> = report.aggregate.buckets.iter().map(|b| b.key.to_string()).collect();
    assert_eq!(keys, vec!["2024-05-03", "2024-05-02"]);
    assert_eq!(report.aggregate.totals.entry_count, 2);
}

#[test]
fn test_blocks_split_on_idle_gap() {
    let root = DataRoot::new();
    root.write_session(
        "proj",
        "session-1",
        &[
            Line::new("2024-05-01T10:10:00Z").render(),
            Line::new("2024-05-01T11:00:00Z").render(),
            Line::new("2024-05-01T18:00:00Z").render(),
        ],
    );

    let report = analyze(&[&root], options(), Granularity::Block);
    assert_eq!(report.blocks.len(), 2);

    let first = &report.blocks[0].block;
    assert_eq!(first.start, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    assert_eq!(first.end, Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap());
    assert_eq!(first.totals.entry_count, 2);
    assert!(!first.is_active);

    let second = &report.blocks[1].block;
    assert_eq!(second.start, Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap());
    assert_eq!(report.idle_gaps.len(), 1);
}
