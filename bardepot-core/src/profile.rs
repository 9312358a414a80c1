//! Column-level statistics for stored datasets.
//!
//! A profile is computed from a frame without modifying it, and saved as a JSON
//! sidecar next to the data (`_profile.json` inside a key directory, or
//! `<stem>_profile.json` next to a single file).

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::writer::write_json_atomic;
use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// A min/max statistic: numeric for number columns, rendered text for temporal ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for StatValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatValue::Number(v) => write!(f, "{v:.4}"),
            StatValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub total_count: usize,
    pub null_count: usize,
    pub unique_count: usize,
    #[serde(default)]
    pub min: Option<StatValue>,
    #[serde(default)]
    pub max: Option<StatValue>,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub std: Option<f64>,
}

impl ColumnProfile {
    pub fn null_pct(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.null_count as f64 / self.total_count as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub total_rows: usize,
    pub total_columns: usize,
    pub columns: Vec<ColumnProfile>,
    pub generated_at: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date_range_start: Option<String>,
    #[serde(default)]
    pub date_range_end: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl DatasetProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Dataset Profile: {}", self.source);
        let _ = writeln!(out, "Generated: {}", self.generated_at);
        let _ = writeln!(out, "Rows: {}", group_thousands(self.total_rows));
        let _ = writeln!(out, "Columns: {}", self.total_columns);
        if let (Some(start), Some(end)) = (&self.date_range_start, &self.date_range_end) {
            let _ = writeln!(out, "Date Range: {start} to {end}");
        }
        if !self.symbols.is_empty() {
            let shown: Vec<&str> = self.symbols.iter().take(10).map(String::as_str).collect();
            let more = if self.symbols.len() > 10 {
                format!(" (+{} more)", self.symbols.len() - 10)
            } else {
                String::new()
            };
            let _ = writeln!(
                out,
                "Symbols ({}): {}{more}",
                self.symbols.len(),
                shown.join(", ")
            );
        }
        out.push('\n');
        let _ = writeln!(
            out,
            "{:<20} {:<24} {:>8} {:>10} {:>14} {:>14}",
            "Column", "Type", "Nulls%", "Unique", "Mean", "Std"
        );
        for c in &self.columns {
            let fmt_opt =
                |v: Option<f64>| v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "-".into());
            let _ = writeln!(
                out,
                "{:<20} {:<24} {:>7.1}% {:>10} {:>14} {:>14}",
                c.name,
                c.dtype,
                c.null_pct(),
                group_thousands(c.unique_count),
                fmt_opt(c.mean),
                fmt_opt(c.std)
            );
        }
        out
    }

    /// One row per column, for tabular display.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let name: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let dtype: Vec<&str> = self.columns.iter().map(|c| c.dtype.as_str()).collect();
        let nulls: Vec<u64> = self.columns.iter().map(|c| c.null_count as u64).collect();
        let unique: Vec<u64> = self.columns.iter().map(|c| c.unique_count as u64).collect();
        let min: Vec<Option<String>> = self
            .columns
            .iter()
            .map(|c| c.min.as_ref().map(|v| v.to_string()))
            .collect();
        let max: Vec<Option<String>> = self
            .columns
            .iter()
            .map(|c| c.max.as_ref().map(|v| v.to_string()))
            .collect();
        let mean: Vec<Option<f64>> = self.columns.iter().map(|c| c.mean).collect();
        let std: Vec<Option<f64>> = self.columns.iter().map(|c| c.std).collect();
        df!(
            "column" => name,
            "dtype" => dtype,
            "null_count" => nulls,
            "unique_count" => unique,
            "min" => min,
            "max" => max,
            "mean" => mean,
            "std" => std,
        )
    }
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn is_temporal(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Date | DataType::Datetime(_, _))
}

/// Smallest and largest non-null values as display strings.
fn text_extremes(s: &Series) -> PolarsResult<(Option<String>, Option<String>)> {
    let non_null = s.drop_nulls();
    if non_null.is_empty() {
        return Ok((None, None));
    }
    let sorted = non_null.sort(SortOptions::default())?;
    let first = sorted.get(0)?.to_string();
    let last = sorted.get(sorted.len() - 1)?.to_string();
    Ok((Some(first), Some(last)))
}

fn profile_column(column: &Column) -> PolarsResult<ColumnProfile> {
    let s = column.as_materialized_series();
    let dtype = s.dtype();
    let mut profile = ColumnProfile {
        name: s.name().to_string(),
        dtype: dtype.to_string(),
        total_count: s.len(),
        null_count: s.null_count(),
        unique_count: if s.is_empty() { 0 } else { s.n_unique()? },
        min: None,
        max: None,
        mean: None,
        std: None,
    };

    if dtype.is_integer() || dtype.is_float() {
        let values = s.drop_nulls().cast(&DataType::Float64)?;
        let ca = values.f64()?;
        if !ca.is_empty() {
            profile.min = ca.min().map(StatValue::Number);
            profile.max = ca.max().map(StatValue::Number);
            profile.mean = ca.mean();
            profile.std = if ca.len() > 1 { ca.std(1) } else { Some(0.0) };
        }
    } else if is_temporal(dtype) {
        let (min, max) = text_extremes(s)?;
        profile.min = min.map(StatValue::Text);
        profile.max = max.map(StatValue::Text);
    }
    Ok(profile)
}

/// Compute a profile of `df`. The frame is only borrowed; zero-row frames
/// produce per-column profiles with zero counts and no statistics.
pub fn generate_profile(
    df: &DataFrame,
    source: &str,
    timestamp_col: &str,
    symbol_col: Option<&str>,
) -> StorageResult<DatasetProfile> {
    let columns = df
        .get_columns()
        .iter()
        .map(profile_column)
        .collect::<PolarsResult<Vec<_>>>()?;

    let (date_range_start, date_range_end) = match df.column(timestamp_col) {
        Ok(ts) if is_temporal(ts.dtype()) => text_extremes(ts.as_materialized_series())?,
        _ => (None, None),
    };

    let mut symbols = Vec::new();
    if let Some(Ok(sym)) = symbol_col.map(|name| df.column(name)) {
        let unique = sym
            .as_materialized_series()
            .drop_nulls()
            .cast(&DataType::String)?
            .unique()?;
        symbols = unique
            .str()?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        symbols.sort();
    }

    Ok(DatasetProfile {
        total_rows: df.height(),
        total_columns: df.width(),
        columns,
        generated_at: Utc::now().to_rfc3339(),
        source: source.to_string(),
        date_range_start,
        date_range_end,
        symbols,
    })
}

/// Write `profile` as pretty JSON, creating parent directories.
pub fn save_profile(profile: &DatasetProfile, path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    write_json_atomic(profile, path)?;
    tracing::debug!(path = %path.display(), "saved profile");
    Ok(())
}

/// Load a saved profile. `Ok(None)` if the file does not exist.
pub fn load_profile(path: &Path) -> StorageResult<Option<DatasetProfile>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StorageError::MetadataDecode {
            path: path.to_path_buf(),
            source,
        })
}

/// Sidecar location for a data directory or data file.
pub fn profile_path(data_path: &Path) -> PathBuf {
    if data_path.is_dir() {
        return data_path.join("_profile.json");
    }
    let stem = data_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    data_path.with_file_name(format!("{stem}_profile.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        let ts = Series::new("timestamp".into(), [1_704_067_200_000_000i64, 1_704_153_600_000_000])
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .unwrap();
        DataFrame::new(vec![
            ts.into_column(),
            Series::new("close".into(), [Some(10.0), None]).into_column(),
            Series::new("symbol".into(), ["SPY", "QQQ"]).into_column(),
        ])
        .unwrap()
    }

    #[test]
    fn profiles_numeric_and_temporal_columns() {
        let df = sample();
        let snapshot = df.clone();
        let p = generate_profile(&df, "test", "timestamp", Some("symbol")).unwrap();

        assert!(df.equals_missing(&snapshot));
        assert_eq!(p.total_rows, 2);
        assert_eq!(p.total_columns, 3);
        assert_eq!(p.symbols, vec!["QQQ", "SPY"]);
        assert_eq!(p.date_range_start.as_deref(), Some("2024-01-01 00:00:00"));

        let close = p.column("close").unwrap();
        assert_eq!(close.null_count, 1);
        assert_eq!(close.min, Some(StatValue::Number(10.0)));
        assert_eq!(close.std, Some(0.0));
        assert!((close.null_pct() - 50.0).abs() < 1e-9);

        let sym = p.column("symbol").unwrap();
        assert_eq!(sym.unique_count, 2);
        assert!(sym.mean.is_none());
    }

    #[test]
    fn zero_rows_profile() {
        let df = sample().head(Some(0));
        let p = generate_profile(&df, "empty", "timestamp", None).unwrap();
        assert_eq!(p.total_rows, 0);
        assert_eq!(p.columns.len(), 3);
        assert!(p.columns.iter().all(|c| c.total_count == 0 && c.min.is_none()));
        assert!(p.date_range_start.is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let p = generate_profile(&sample(), "test", "timestamp", None).unwrap();
        let path = dir.path().join("nested/_profile.json");

        save_profile(&p, &path).unwrap();
        assert_eq!(load_profile(&path).unwrap(), Some(p));
        assert_eq!(load_profile(&dir.path().join("absent.json")).unwrap(), None);
    }

    #[test]
    fn sidecar_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(profile_path(dir.path()), dir.path().join("_profile.json"));
        assert_eq!(
            profile_path(&dir.path().join("bars.parquet")),
            dir.path().join("bars_profile.json")
        );
    }

    #[test]
    fn summary_mentions_columns() {
        let p = generate_profile(&sample(), "yahoo/SPY", "timestamp", Some("symbol")).unwrap();
        let text = p.summary();
        assert!(text.contains("Dataset Profile: yahoo/SPY"));
        assert!(text.contains("close"));
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(p.to_dataframe().unwrap().height(), 3);
    }
}
