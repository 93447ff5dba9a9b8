//! Criterion benchmarks for partition subset and mapping operations
//!
//! Time-window subsets are range based, so these benchmarks vary the number
//! of disjoint ranges rather than the number of partitions.

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reconciler_core::{
    AssetGraph, AssetKey, AssetNode, DynamicPartitionsSnapshot, IndexRange, PartitionContext,
    PartitionSubset, PartitionsDefinition, TimeGranularity, TimeWindowPartitions,
};

fn hourly() -> TimeWindowPartitions {
    TimeWindowPartitions::parse(TimeGranularity::Hourly, "2020-01-01-00:00").unwrap()
}

/// Subset with `count` ranges of `width` windows separated by `gap` windows
fn striped_subset(count: i64, width: i64, gap: i64, offset: i64) -> PartitionSubset {
    let ranges = (0..count)
        .map(|i| {
            let start = offset + i * (width + gap);
            IndexRange::new(start, start + width)
        })
        .collect();
    PartitionSubset::from_ranges(hourly(), ranges)
}

fn bench_set_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("subset_set_operations");

    for ranges in [10_i64, 100, 1_000, 10_000].iter() {
        let left = striped_subset(*ranges, 5, 3, 0);
        let right = striped_subset(*ranges, 4, 4, 2);
        group.throughput(Throughput::Elements(*ranges as u64));

        group.bench_with_input(BenchmarkId::new("union", ranges), &(&left, &right), |b, (l, r)| {
            b.iter(|| black_box(l.union(r).unwrap()));
        });
        group.bench_with_input(
            BenchmarkId::new("intersect", ranges),
            &(&left, &right),
            |b, (l, r)| {
                b.iter(|| black_box(l.intersect(r).unwrap()));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("subtract", ranges),
            &(&left, &right),
            |b, (l, r)| {
                b.iter(|| black_box(l.subtract(r).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_membership(c: &mut Criterion) {
    let mut group = c.benchmark_group("subset_membership");
    let subset = striped_subset(10_000, 5, 3, 0);

    group.bench_function("contains_hit", |b| {
        b.iter(|| black_box(subset.contains("2021-01-01-00:00")));
    });
    group.bench_function("contains_malformed", |b| {
        b.iter(|| black_box(subset.contains("bad partition key")));
    });

    group.finish();
}

fn bench_hourly_to_daily_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_mapping");
    let graph = AssetGraph::from_assets(vec![
        AssetNode::builder("hourly")
            .partitions(PartitionsDefinition::hourly("2020-01-01-00:00").unwrap())
            .build(),
        AssetNode::builder("daily")
            .partitions(PartitionsDefinition::daily("2020-01-01").unwrap())
            .depends_on("hourly")
            .build(),
    ])
    .unwrap();
    let dynamic = DynamicPartitionsSnapshot::default();
    let ctx = PartitionContext::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), &dynamic);
    let hourly_key = AssetKey::from("hourly");
    let daily_key = AssetKey::from("daily");

    for ranges in [10_i64, 1_000].iter() {
        let subset = striped_subset(*ranges, 30, 18, 0);
        group.bench_with_input(BenchmarkId::new("conservative", ranges), &subset, |b, s| {
            b.iter(|| black_box(graph.map_partitions(&hourly_key, &daily_key, s, &ctx).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("any", ranges), &subset, |b, s| {
            b.iter(|| {
                black_box(
                    graph
                        .map_partitions_any(&hourly_key, &daily_key, s, &ctx)
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_set_operations,
    bench_membership,
    bench_hourly_to_daily_mapping
);
criterion_main!(benches);
