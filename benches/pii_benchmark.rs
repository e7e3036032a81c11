// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! PII resolver benchmarks.
//!
//! Covers the resolver hot path: the regex bank sweep, conflict
//! resolution, and redaction rendering over texts of increasing size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use geoprivacy_node::pii::PiiResolver;

/// Build a text with a fixed density of structured PII
fn sample_text(paragraphs: usize) -> String {
    let mut text = String::new();
    for i in 0..paragraphs {
        text.push_str(&format!(
            "Case {i}: Jane Doe reported her SSN 123-45-6789 and card \
             4111-1111-1111-1111 stolen. Contact her at jane{i}@example.com \
             or (555) 867-5309, or write to 123 Main Street, zip 94103-1234. "
        ));
    }
    text
}

fn bench_scan(c: &mut Criterion) {
    let resolver = PiiResolver::new(None);
    let mut group = c.benchmark_group("pii_scan");

    for paragraphs in [1usize, 10, 100] {
        let text = sample_text(paragraphs);
        group.bench_with_input(
            BenchmarkId::from_parameter(paragraphs),
            &text,
            |b, text| {
                b.iter(|| {
                    let report = resolver.scan(black_box(text));
                    black_box(report.total())
                })
            },
        );
    }
    group.finish();
}

fn bench_redact(c: &mut Criterion) {
    let resolver = PiiResolver::new(None);
    let text = sample_text(50);
    let report = resolver.scan(&text);

    c.bench_function("pii_redact_50_paragraphs", |b| {
        b.iter(|| black_box(resolver.redact(black_box(&text), &report)))
    });
}

criterion_group!(benches, bench_scan, bench_redact);
criterion_main!(benches);
