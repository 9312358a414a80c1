//! Criterion benchmarks for storage hot paths.
//!
//! Benchmarks:
//! 1. Partition derivation and split
//! 2. Full write of a key (partitioned parquet + metadata)
//! 3. Range read with pruning vs full scan
//! 4. Incremental merge of an overlapping chunk

use bardepot_core::storage::partition::{derive_partition_columns, split_partitions};
use bardepot_core::storage::{
    Granularity, IncrementalStorage, Storage, StorageBackend, StorageConfig, TIMESTAMP_COL,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polars::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

fn make_bars(n: usize, step: Duration) -> DataFrame {
    let micros: Vec<i64> = (0..n)
        .map(|i| (start() + step * i as i32).timestamp_micros())
        .collect();
    let ts = Series::new(TIMESTAMP_COL.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, Some("UTC".into())))
        .unwrap();
    let close: Vec<f64> = (0..n).map(|i| 100.0 + (i as f64 * 0.1).sin() * 10.0).collect();
    let volume: Vec<i64> = (0..n).map(|i| 10_000 + (i % 500) as i64).collect();
    DataFrame::new(vec![
        ts.into_column(),
        Series::new("close".into(), close).into_column(),
        Series::new("volume".into(), volume).into_column(),
    ])
    .unwrap()
}

fn quiet_storage(dir: &std::path::Path, granularity: Granularity) -> Storage {
    Storage::open(
        StorageConfig::new(dir)
            .with_granularity(granularity)
            .with_profile(false),
    )
    .unwrap()
}

// ── 1. Partition split ───────────────────────────────────────────────

fn bench_partition_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_split");
    let df = make_bars(100_000, Duration::minutes(5));
    for granularity in [Granularity::Month, Granularity::Day] {
        let levels = granularity.levels();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{granularity:?}")),
            &levels,
            |b, levels| {
                b.iter(|| {
                    let derived = derive_partition_columns(black_box(&df), levels).unwrap();
                    split_partitions(&derived, levels).unwrap()
                })
            },
        );
    }
    group.finish();
}

// ── 2. Write ─────────────────────────────────────────────────────────

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    group.sample_size(10);
    let df = make_bars(50_000, Duration::minutes(15));
    let dir = tempfile::tempdir().unwrap();
    let storage = quiet_storage(dir.path(), Granularity::Month);

    group.bench_function("month_50k", |b| {
        b.iter(|| {
            storage
                .write(black_box(df.clone()).into(), Some("bench/WRITE"), None)
                .unwrap()
        })
    });
    group.finish();
}

// ── 3. Read ──────────────────────────────────────────────────────────

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let dir = tempfile::tempdir().unwrap();
    let storage = quiet_storage(dir.path(), Granularity::Day);
    storage
        .write(make_bars(100_000, Duration::minutes(5)).into(), Some("bench/READ"), None)
        .unwrap();

    let from = start() + Duration::days(100);
    let to = from + Duration::days(7);

    group.bench_function("one_week", |b| {
        b.iter(|| {
            storage
                .read("bench/READ", Some(from), Some(to), None)
                .unwrap()
                .collect()
                .unwrap()
        })
    });
    group.bench_function("full_scan", |b| {
        b.iter(|| storage.read("bench/READ", None, None, None).unwrap().collect().unwrap())
    });
    group.finish();
}

// ── 4. Incremental merge ─────────────────────────────────────────────

fn bench_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental");
    group.sample_size(10);
    let dir = tempfile::tempdir().unwrap();
    let storage = quiet_storage(dir.path(), Granularity::Month);
    let base = make_bars(20_000, Duration::hours(1));
    storage.update_combined_file(&base, "SPY", "bench").unwrap();

    // Re-applies the trailing rows; after the first iteration every run is a no-op merge.
    let overlap = base.slice(19_000, 1_000);
    group.bench_function("overlap_1k", |b| {
        b.iter(|| {
            storage
                .update_combined_file(black_box(&overlap), "SPY", "bench")
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_partition_split,
    bench_write,
    bench_read,
    bench_incremental
);
criterion_main!(benches);
