//! Parser throughput benchmarks
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use usage_monitor::dedup::{Deduplicator, HashDeduplicator};
use usage_monitor::parser::LineParser;

/// JSONL body with `num_lines` assistant lines, every tenth malformed when `include_errors`
fn generate_test_jsonl(num_lines: usize, include_errors: bool) -> String {
    let mut lines = Vec::with_capacity(num_lines);

    for i in 0..num_lines {
        if include_errors && i % 10 == 5 {
            lines.push("{broken json}".to_string());
        } else {
            lines.push(format!(
                r#"{{"timestamp":"2025-01-15T10:30:{:02}Z","sessionId":"s{}","message":{{"id":"msg_{}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{},"output_tokens":{},"cache_creation_input_tokens":{},"cache_read_input_tokens":{}}}}},"requestId":"req_{}"}}"#,
                i % 60,
                i / 100,
                i,
                100 + i,
                200 + i,
                i % 50,
                i % 100,
                i
            ));
        }
    }

    lines.join("\n")
}

fn benchmark_parse_content(c: &mut Criterion) {
    let parser = LineParser::default();
    let mut group = c.benchmark_group("parse_content");

    for size in [10, 100, 1000, 10000] {
        let content = generate_test_jsonl(size, false);
        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| parser.parse_content(black_box(content), "/bench/project", Some("bench")));
        });
    }

    group.finish();
}

fn benchmark_malformed_lines(c: &mut Criterion) {
    let parser = LineParser::default();
    let mut group = c.benchmark_group("parse_content_with_errors");

    for size in [100, 1000] {
        let content = generate_test_jsonl(size, true);
        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| parser.parse_content(black_box(content), "/bench/project", None));
        });
    }

    group.finish();
}

fn benchmark_dedup(c: &mut Criterion) {
    let parser = LineParser::default();
    let entries = parser
        .parse_content(&generate_test_jsonl(10000, false), "/bench/project", None)
        .entries;

    c.bench_function("dedup_10000", |b| {
        b.iter(|| {
            let dedup = HashDeduplicator::new();
            entries
                .iter()
                .filter(|entry| dedup.should_include_entry(black_box(entry)))
                .count()
        });
    });
}

criterion_group!(benches, benchmark_parse_content, benchmark_malformed_lines, benchmark_dedup);
criterion_main!(benches);
