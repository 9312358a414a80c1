//! Partition key derivation and hive directory naming.
//!
//! Partition values are always computed in UTC from the `timestamp` column,
//! whatever its unit or time zone, so that directory names and the pruner's
//! date bounds agree.

use super::config::PartitionLevel;
use super::error::{StorageError, StorageResult};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use polars::prelude::*;
use std::path::PathBuf;

/// Name of the column every stored dataset must carry.
pub const TIMESTAMP_COL: &str = "timestamp";

/// File name of the single data file in each leaf partition.
pub const DATA_FILE: &str = "data.parquet";

/// Check that `timestamp` exists, is temporal, and has no nulls.
pub fn validate_timestamp(df: &DataFrame) -> StorageResult<()> {
    let ts = df
        .column(TIMESTAMP_COL)
        .map_err(|_| StorageError::MissingColumn {
            column: TIMESTAMP_COL.to_string(),
        })?;
    match ts.dtype() {
        DataType::Datetime(_, _) | DataType::Date => {}
        other => {
            return Err(StorageError::InvalidTimestampType {
                column: TIMESTAMP_COL.to_string(),
                dtype: other.clone(),
            })
        }
    }
    let nulls = ts.null_count();
    if nulls > 0 {
        return Err(StorageError::NullTimestamps { count: nulls });
    }
    Ok(())
}

/// `timestamp` as a naive UTC datetime, regardless of its stored unit/zone.
fn utc_timestamp() -> Expr {
    col(TIMESTAMP_COL)
        .dt()
        .timestamp(TimeUnit::Microseconds)
        .cast(DataType::Datetime(TimeUnit::Microseconds, None))
}

fn level_expr(level: PartitionLevel) -> Expr {
    let ts = utc_timestamp();
    let extracted = match level {
        PartitionLevel::Year => ts.dt().year(),
        PartitionLevel::Month => ts.dt().month(),
        PartitionLevel::Day => ts.dt().day(),
        PartitionLevel::Hour => ts.dt().hour(),
    };
    extracted.cast(DataType::Int32).alias(level.name())
}

/// Add one `Int32` column per requested level, derived from `timestamp`.
///
/// Row count and existing columns are preserved; no level outside `levels`
/// is added.
pub fn derive_partition_columns(
    df: &DataFrame,
    levels: &[PartitionLevel],
) -> StorageResult<DataFrame> {
    validate_timestamp(df)?;
    if levels.is_empty() {
        return Ok(df.clone());
    }
    let exprs: Vec<Expr> = levels.iter().copied().map(level_expr).collect();
    Ok(df.clone().lazy().with_columns(exprs).collect()?)
}

/// Concrete partition values for one leaf directory, coarsest first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PartitionValues {
    values: Vec<(PartitionLevel, i32)>,
}

impl PartitionValues {
    pub fn new(values: Vec<(PartitionLevel, i32)>) -> Self {
        Self { values }
    }

    /// The unpartitioned (flat) root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn get(&self, level: PartitionLevel) -> Option<i32> {
        self.values
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, v)| *v)
    }

    pub fn is_root(&self) -> bool {
        self.values.is_empty()
    }

    /// Directory relative to the key directory, e.g. `year=2024/month=1`.
    pub fn dir_path(&self) -> PathBuf {
        self.values
            .iter()
            .map(|(level, value)| format!("{level}={value}"))
            .collect()
    }

    /// Same as [`dir_path`](Self::dir_path) but always `/`-separated, for metadata.
    pub fn relative_name(&self) -> String {
        self.values
            .iter()
            .map(|(level, value)| format!("{level}={value}"))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The UTC window `[start, end)` this partition covers.
    ///
    /// `None` when the values don't describe a real calendar bucket (or for
    /// the flat root), in which case the partition must never be pruned.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let year = self.get(PartitionLevel::Year)?;
        let month = self.get(PartitionLevel::Month);
        let day = self.get(PartitionLevel::Day);
        let hour = self.get(PartitionLevel::Hour);

        let m = u32::try_from(month.unwrap_or(1)).ok()?;
        let d = u32::try_from(day.unwrap_or(1)).ok()?;
        let h = u32::try_from(hour.unwrap_or(0)).ok()?;
        if h > 23 {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(year, m, d)?;
        let start = Utc.from_utc_datetime(&date.and_hms_opt(h, 0, 0)?);

        let end = if hour.is_some() {
            start + Duration::hours(1)
        } else if day.is_some() {
            start + Duration::days(1)
        } else if month.is_some() {
            let (ny, nm) = if m == 12 { (year + 1, 1) } else { (year, m + 1) };
            Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(ny, nm, 1)?.and_hms_opt(0, 0, 0)?)
        } else {
            Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(year + 1, 1, 1)?.and_hms_opt(0, 0, 0)?)
        };
        Some((start, end))
    }

    /// Whether this partition may hold rows in `[start, end)`.
    ///
    /// Conservative: anything that can't be placed on the calendar is kept.
    pub fn may_overlap(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
        let Some((p_start, p_end)) = self.time_range() else {
            return true;
        };
        if let Some(start) = start {
            if p_end <= start {
                return false;
            }
        }
        if let Some(end) = end {
            if p_start >= end {
                return false;
            }
        }
        true
    }
}

/// Parse one `col=value` directory name.
pub fn parse_partition_segment(name: &str) -> Option<(PartitionLevel, i32)> {
    let (col, value) = name.split_once('=')?;
    let level = PartitionLevel::from_name(col)?;
    let value = value.parse::<i32>().ok()?;
    Some((level, value))
}

/// Split a frame carrying derived partition columns into per-leaf frames,
/// with the partition columns stripped.
pub fn split_partitions(
    df: &DataFrame,
    levels: &[PartitionLevel],
) -> StorageResult<Vec<(PartitionValues, DataFrame)>> {
    if levels.is_empty() {
        return Ok(vec![(PartitionValues::root(), df.clone())]);
    }
    if df.height() == 0 {
        return Ok(Vec::new());
    }

    let names: Vec<&str> = levels.iter().map(|l| l.name()).collect();
    let groups = df.partition_by_stable(names, true)?;

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        if group.height() == 0 {
            continue;
        }
        let mut values = Vec::with_capacity(levels.len());
        for level in levels {
            let value = group.column(level.name())?.i32()?.get(0).ok_or_else(|| {
                StorageError::NullTimestamps { count: group.height() }
            })?;
            values.push((*level, value));
        }
        let mut data = group;
        for level in levels {
            data = data.drop(level.name())?;
        }
        out.push((PartitionValues::new(values), data));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PartitionLevel::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn ts_frame(stamps: &[DateTime<Utc>]) -> DataFrame {
        let micros: Vec<i64> = stamps.iter().map(|t| t.timestamp_micros()).collect();
        let ts = Series::new(TIMESTAMP_COL.into(), micros)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, Some("UTC".into())))
            .unwrap();
        let close: Vec<f64> = (0..stamps.len()).map(|i| 100.0 + i as f64).collect();
        DataFrame::new(vec![
            ts.into_column(),
            Series::new("close".into(), close).into_column(),
        ])
        .unwrap()
    }

    #[test]
    fn derives_only_requested_levels() {
        let df = ts_frame(&[utc(2024, 3, 15, 13), utc(2024, 12, 31, 23)]);
        let out = derive_partition_columns(&df, &[Year, Month]).unwrap();

        assert_eq!(out.height(), 2);
        assert!(out.column("timestamp").is_ok());
        assert!(out.column("close").is_ok());
        assert!(out.column("day").is_err());
        assert!(out.column("hour").is_err());

        let months: Vec<Option<i32>> = out
            .column("month")
            .unwrap()
            .i32()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(months, vec![Some(3), Some(12)]);
    }

    #[test]
    fn derives_hour_level() {
        let df = ts_frame(&[utc(2024, 3, 15, 13)]);
        let out = derive_partition_columns(&df, &[Year, Month, Day, Hour]).unwrap();
        let hour = out.column("hour").unwrap().i32().unwrap().get(0);
        assert_eq!(hour, Some(13));
    }

    #[test]
    fn missing_timestamp_is_schema_error() {
        let df = df!("close" => &[1.0, 2.0]).unwrap();
        let err = derive_partition_columns(&df, &[Year]).unwrap_err();
        assert!(matches!(err, StorageError::MissingColumn { .. }));
    }

    #[test]
    fn non_temporal_timestamp_rejected() {
        let df = df!("timestamp" => &["2024-01-01"], "close" => &[1.0]).unwrap();
        let err = derive_partition_columns(&df, &[Year]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidTimestampType { .. }));
    }

    #[test]
    fn split_strips_partition_columns() {
        let df = ts_frame(&[utc(2024, 1, 1, 0), utc(2024, 1, 2, 0), utc(2024, 2, 1, 0)]);
        let derived = derive_partition_columns(&df, &[Year, Month]).unwrap();
        let parts = split_partitions(&derived, &[Year, Month]).unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0.relative_name(), "year=2024/month=1");
        assert_eq!(parts[0].1.height(), 2);
        assert_eq!(parts[1].0.relative_name(), "year=2024/month=2");
        for (_, frame) in &parts {
            assert_eq!(frame.width(), 2);
            assert!(frame.column("year").is_err());
        }
    }

    #[test]
    fn time_range_per_level() {
        let month = PartitionValues::new(vec![(Year, 2024), (Month, 12)]);
        assert_eq!(
            month.time_range(),
            Some((utc(2024, 12, 1, 0), utc(2025, 1, 1, 0)))
        );

        let hour = PartitionValues::new(vec![(Year, 2024), (Month, 2), (Day, 29), (Hour, 23)]);
        assert_eq!(
            hour.time_range(),
            Some((utc(2024, 2, 29, 23), utc(2024, 3, 1, 0)))
        );

        let bogus = PartitionValues::new(vec![(Year, 2024), (Month, 13)]);
        assert_eq!(bogus.time_range(), None);
        assert!(bogus.may_overlap(Some(utc(2030, 1, 1, 0)), None));
    }

    #[test]
    fn boundary_partitions_are_not_pruned() {
        let feb = PartitionValues::new(vec![(Year, 2024), (Month, 2)]);
        // Range starting on the last hour of February still touches it.
        assert!(feb.may_overlap(Some(utc(2024, 2, 29, 23)), Some(utc(2024, 3, 5, 0))));
        // End is exclusive: a range ending at Feb 1 00:00 cannot touch February.
        assert!(!feb.may_overlap(Some(utc(2024, 1, 1, 0)), Some(utc(2024, 2, 1, 0))));
        // A range starting exactly at March excludes February.
        assert!(!feb.may_overlap(Some(utc(2024, 3, 1, 0)), None));
    }

    #[test]
    fn parse_segments() {
        assert_eq!(parse_partition_segment("day=9"), Some((Day, 9)));
        assert_eq!(parse_partition_segment("week=3"), None);
        assert_eq!(parse_partition_segment("year=abc"), None);
    }
}
