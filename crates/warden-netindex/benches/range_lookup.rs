//! Range index lookup benchmark
//!
//! Compares the production range tree against the alternate strategies
//! exposed through `contains_with`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::net::{IpAddr, Ipv4Addr};
use warden_netindex::{LookupStrategy, NetworkIndex};

fn build_index(ranges: u32) -> NetworkIndex {
    // Spread /24 blocks across the address space with a fixed stride
    let entries: Vec<String> = (0..ranges)
        .map(|i| {
            let base = i.wrapping_mul(2_654_435_761) & 0xFFFF_FF00;
            format!("{}/24", Ipv4Addr::from(base))
        })
        .collect();
    NetworkIndex::build(entries)
}

fn probes() -> Vec<IpAddr> {
    (0..1_024u32)
        .map(|i| IpAddr::V4(Ipv4Addr::from(i.wrapping_mul(40_503).rotate_left(7))))
        .collect()
}

fn strategy_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_lookup");
    let probes = probes();

    for size in [100u32, 1_000, 10_000] {
        let index = build_index(size);
        for (name, strategy) in [
            ("range_tree", LookupStrategy::RangeTree),
            ("sorted_ranges", LookupStrategy::SortedRanges),
            ("linear_scan", LookupStrategy::LinearScan),
        ] {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter(|| {
                    let mut hits = 0u32;
                    for addr in &probes {
                        if index.contains_with(black_box(addr), strategy) {
                            hits += 1;
                        }
                    }
                    black_box(hits)
                })
            });
        }
    }

    group.finish();
}

fn exact_match_benchmark(c: &mut Criterion) {
    let entries: Vec<String> = (0..10_000u32)
        .map(|i| Ipv4Addr::from(i.wrapping_mul(2_654_435_761)).to_string())
        .collect();
    let index = NetworkIndex::build(&entries);

    c.bench_function("exact_match_hit", |b| {
        b.iter(|| black_box(index.contains(black_box(&entries[4_242]))))
    });
    c.bench_function("parse_and_miss", |b| {
        b.iter(|| black_box(index.contains(black_box("203.0.113.77"))))
    });
}

criterion_group!(benches, strategy_benchmark, exact_match_benchmark);
criterion_main!(benches);
