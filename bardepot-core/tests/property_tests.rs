//! Property tests for storage invariants.
//!
//! Uses proptest to verify:
//! 1. Key encoding is reversible and never produces nested paths
//! 2. Date-range reads return exactly the rows inside `[start, end)`
//! 3. Partition pruning never drops a partition that holds matching rows

use bardepot_core::storage::key::{decode_key, encode_key};
use bardepot_core::storage::partition::PartitionValues;
use bardepot_core::storage::{
    Granularity, PartitionLevel, Storage, StorageBackend, StorageConfig, TIMESTAMP_COL,
};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use polars::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_key() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_%./\\\\-]{1,24}"
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 25, 0, 0, 0).unwrap()
}

/// Hour offsets spanning roughly two months, so month and day boundaries occur.
fn arb_offsets() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(0i64..(24 * 70), 1..120)
}

fn frame(offsets: &BTreeSet<i64>) -> DataFrame {
    let micros: Vec<i64> = offsets
        .iter()
        .map(|h| (epoch() + Duration::hours(*h)).timestamp_micros())
        .collect();
    let ts = Series::new(TIMESTAMP_COL.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, Some("UTC".into())))
        .unwrap();
    let close: Vec<f64> = offsets.iter().map(|h| *h as f64).collect();
    DataFrame::new(vec![
        ts.into_column(),
        Series::new("close".into(), close).into_column(),
    ])
    .unwrap()
}

fn values_for(t: DateTime<Utc>, levels: &[PartitionLevel]) -> PartitionValues {
    let values = levels
        .iter()
        .map(|level| {
            let v = match level {
                PartitionLevel::Year => t.year(),
                PartitionLevel::Month => t.month() as i32,
                PartitionLevel::Day => t.day() as i32,
                PartitionLevel::Hour => t.hour() as i32,
            };
            (*level, v)
        })
        .collect();
    PartitionValues::new(values)
}

// ── 1. Key bijection ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn key_encoding_round_trips(key in arb_key()) {
        let encoded = encode_key(&key).unwrap();
        prop_assert!(!encoded.contains('/'));
        prop_assert!(!encoded.starts_with('.'));
        prop_assert_eq!(decode_key(&encoded), Some(key));
    }

    #[test]
    fn distinct_keys_get_distinct_directories(a in arb_key(), b in arb_key()) {
        prop_assume!(a != b);
        prop_assert_ne!(encode_key(&a).unwrap(), encode_key(&b).unwrap());
    }
}

// ── 2. Range reads are exact ─────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn range_read_matches_in_memory_filter(
        offsets in arb_offsets(),
        a in 0i64..(24 * 72),
        b in 0i64..(24 * 72),
        granularity in prop_oneof![
            Just(Granularity::Year),
            Just(Granularity::Month),
            Just(Granularity::Day),
        ],
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(
            StorageConfig::new(dir.path())
                .with_granularity(granularity)
                .with_profile(false),
        )
        .unwrap();
        storage.write(frame(&offsets).into(), Some("prop/KEY"), None).unwrap();

        let start = epoch() + Duration::hours(lo);
        let end = epoch() + Duration::hours(hi);
        let out = storage
            .read("prop/KEY", Some(start), Some(end), None)
            .unwrap()
            .collect()
            .unwrap();

        let expected = offsets.iter().filter(|h| **h >= lo && **h < hi).count();
        prop_assert_eq!(out.height(), expected);
    }
}

// ── 3. Pruning is conservative ───────────────────────────────────────

proptest! {
    #[test]
    fn partition_holding_a_row_is_never_pruned(
        lo_minutes in 0i64..(60 * 24 * 400),
        len_minutes in 1i64..(60 * 24 * 40),
        within in 0i64..(60 * 24 * 40),
        depth in 1usize..=4,
    ) {
        let levels = &PartitionLevel::ALL[..depth];
        let start = epoch() + Duration::minutes(lo_minutes);
        let end = start + Duration::minutes(len_minutes);
        let t = start + Duration::minutes(within % len_minutes);

        prop_assert!(values_for(t, levels).may_overlap(Some(start), Some(end)));
    }
}
