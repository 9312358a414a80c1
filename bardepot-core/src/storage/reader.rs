//! Partition enumeration, date pruning, and lazy scans.
//!
//! Pruning works on directory names only and is conservative; the exact
//! `start <= timestamp < end` filter is applied per row inside each scan.

use super::config::PartitionLevel;
use super::error::StorageResult;
use super::partition::{parse_partition_segment, PartitionValues, DATA_FILE, TIMESTAMP_COL};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// One leaf data file and the partition values parsed from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub values: PartitionValues,
    pub path: PathBuf,
}

/// Reads the partitions of a single key directory.
#[derive(Debug, Clone)]
pub struct PartitionReader<'a> {
    key_dir: &'a Path,
    levels: &'a [PartitionLevel],
}

impl<'a> PartitionReader<'a> {
    pub fn new(key_dir: &'a Path, levels: &'a [PartitionLevel]) -> Self {
        Self { key_dir, levels }
    }

    /// Every leaf data file following the `level=value/.../data.parquet`
    /// nesting, in chronological partition order.
    pub fn files(&self) -> StorageResult<Vec<PartitionFile>> {
        let mut out = Vec::new();
        collect_files(self.key_dir, self.levels, Vec::new(), &mut out)?;
        out.sort_by(|a, b| a.values.cmp(&b.values));
        Ok(out)
    }

    /// Files whose partition window may intersect `[start, end)`.
    pub fn candidates(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<PartitionFile>> {
        let files = self.files()?;
        if start.is_none() && end.is_none() {
            return Ok(files);
        }
        let total = files.len();
        let kept: Vec<PartitionFile> = files
            .into_iter()
            .filter(|f| f.values.may_overlap(start, end))
            .collect();
        tracing::debug!(
            key_dir = %self.key_dir.display(),
            total,
            kept = kept.len(),
            "pruned partitions"
        );
        Ok(kept)
    }

    /// Lazy scan over the surviving partitions, row-filtered and projected.
    pub fn scan(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        columns: Option<&[String]>,
    ) -> StorageResult<LazyFrame> {
        let files = self.candidates(start, end)?;
        scan_files(&files, start, end, columns)
    }
}

fn collect_files(
    dir: &Path,
    levels: &[PartitionLevel],
    prefix: Vec<(PartitionLevel, i32)>,
    out: &mut Vec<PartitionFile>,
) -> StorageResult<()> {
    let Some((level, rest)) = levels.split_first() else {
        let path = dir.join(DATA_FILE);
        if path.is_file() {
            out.push(PartitionFile {
                values: PartitionValues::new(prefix),
                path,
            });
        }
        return Ok(());
    };

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some((found, value)) = name.to_str().and_then(parse_partition_segment) else {
            continue;
        };
        if found != *level {
            continue;
        }
        let mut next = prefix.clone();
        next.push((found, value));
        collect_files(&entry.path(), rest, next, out)?;
    }
    Ok(())
}

/// `start <= timestamp < end`, compared on UTC epoch microseconds so any
/// stored unit or zone works.
pub fn range_predicate(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<Expr> {
    let epoch_us = || col(TIMESTAMP_COL).dt().timestamp(TimeUnit::Microseconds);
    let lower = start.map(|s| epoch_us().gt_eq(lit(s.timestamp_micros())));
    let upper = end.map(|e| epoch_us().lt(lit(e.timestamp_micros())));
    match (lower, upper) {
        (Some(l), Some(u)) => Some(l.and(u)),
        (l, u) => l.or(u),
    }
}

fn scan_one(path: &Path) -> StorageResult<LazyFrame> {
    let mut args = ScanArgsParquet::default();
    // Partition values live in the path only; keep them out of the rows.
    args.hive_options.enabled = Some(false);
    args.glob = false;
    Ok(LazyFrame::scan_parquet(path, args)?)
}

/// Build one lazy frame over `files`. An empty list gives an empty frame.
pub fn scan_files(
    files: &[PartitionFile],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    columns: Option<&[String]>,
) -> StorageResult<LazyFrame> {
    let predicate = range_predicate(start, end);
    let projection: Option<Vec<Expr>> =
        columns.map(|cols| cols.iter().map(|c| col(c.as_str())).collect());

    let mut frames = Vec::with_capacity(files.len());
    for file in files {
        let mut lf = scan_one(&file.path)?;
        if let Some(pred) = &predicate {
            lf = lf.filter(pred.clone());
        }
        if let Some(proj) = &projection {
            lf = lf.select(proj.clone());
        }
        frames.push(lf);
    }

    match frames.len() {
        0 => Ok(DataFrame::empty().lazy()),
        1 => Ok(frames.remove(0)),
        _ => Ok(concat(
            frames,
            UnionArgs {
                to_supertypes: true,
                rechunk: false,
                ..Default::default()
            },
        )?),
    }
}
