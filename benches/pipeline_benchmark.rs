//! Performance benchmarks for parsing, deduplication and block reconstruction
//!
//! Run with: cargo bench

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::io::Cursor;
use usage_ledger::aggregator::Granularity;
use usage_ledger::dedup::DeduplicationEngine;
use usage_ledger::models::SourceInfo;
use usage_ledger::parser::FileParser;
use usage_ledger::{AnalysisOptions, PricingTable, UsageAnalyzer};

/// Generate JSONL with one entry every 30 seconds; every 10th line repeats
/// the previous message id.
fn generate_jsonl(num_lines: usize) -> String {
    let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
    let mut lines = Vec::with_capacity(num_lines);

    for i in 0..num_lines {
        let id = if i % 10 == 9 { i - 1 } else { i };
        let timestamp = start + chrono::Duration::seconds(30 * i as i64);
        lines.push(format!(
            r#"{{"timestamp":"{}","sessionId":"bench","requestId":"req_{}","message":{{"id":"msg_{}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{},"output_tokens":{},"cache_creation_input_tokens":{},"cache_read_input_tokens":{}}}}}}}"#,
            timestamp.to_rfc3339(),
            id,
            id,
            100 + i % 500,
            200 + i % 300,
            i % 50,
            i % 100
        ));
    }

    lines.join("\n")
}

fn benchmark_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for size in [1_000, 10_000, 100_000].iter() {
        let content = generate_jsonl(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let parser = FileParser::new();
            b.iter(|| parser.parse_reader(Cursor::new(black_box(content.as_bytes())), SourceInfo::new("bench.jsonl")));
        });
    }

    group.finish();
}

fn benchmark_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup");

    for size in [1_000, 10_000, 100_000].iter() {
        let batch = FileParser::new().parse_reader(Cursor::new(generate_jsonl(*size)), SourceInfo::new("bench.jsonl"));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let engine = DeduplicationEngine::new();
            b.iter(|| engine.deduplicate(black_box(batch.entries.clone())));
        });
    }

    group.finish();
}

fn benchmark_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocks_pipeline");
    group.sample_size(20);

    for size in [1_000, 10_000, 100_000].iter() {
        let batch = FileParser::new().parse_reader(Cursor::new(generate_jsonl(*size)), SourceInfo::new("bench.jsonl"));
        let analyzer = UsageAnalyzer::new(PricingTable::builtin(), AnalysisOptions::default());
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| analyzer.run(black_box(vec![batch.clone()]), Granularity::Block));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_parse, benchmark_dedup, benchmark_blocks);
criterion_main!(benches);
