//! Storage configuration.
//!
//! A pure value object: base path, strategy, compression, granularity and the
//! write/locking policy. Loaded from TOML or built programmatically.

use super::error::{StorageError, StorageResult};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How a key's rows are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// `col=value` directories per time bucket.
    #[default]
    Hive,
    /// One `data.parquet` per key, no partition directories.
    Flat,
}

/// Time bucket size for hive partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Granularity {
    Year,
    #[default]
    Month,
    Day,
    Hour,
}

impl Granularity {
    /// Parse a granularity name, falling back to `Month` for anything unknown.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "year" => Granularity::Year,
            "month" => Granularity::Month,
            "day" => Granularity::Day,
            "hour" => Granularity::Hour,
            other => {
                tracing::warn!(granularity = other, "unknown partition granularity, using month");
                Granularity::Month
            }
        }
    }

    /// Partition levels implied by this granularity, coarsest first.
    pub fn levels(self) -> Vec<PartitionLevel> {
        let depth = match self {
            Granularity::Year => 1,
            Granularity::Month => 2,
            Granularity::Day => 3,
            Granularity::Hour => 4,
        };
        PartitionLevel::ALL[..depth].to_vec()
    }
}

impl From<String> for Granularity {
    fn from(s: String) -> Self {
        Granularity::parse_lenient(&s)
    }
}

/// One level of hive partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionLevel {
    Year,
    Month,
    Day,
    Hour,
}

impl PartitionLevel {
    /// Fixed nesting order.
    pub const ALL: [PartitionLevel; 4] = [
        PartitionLevel::Year,
        PartitionLevel::Month,
        PartitionLevel::Day,
        PartitionLevel::Hour,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PartitionLevel::Year => "year",
            PartitionLevel::Month => "month",
            PartitionLevel::Day => "day",
            PartitionLevel::Hour => "hour",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PartitionLevel::ALL.into_iter().find(|l| l.name() == name)
    }
}

impl fmt::Display for PartitionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parquet codec used for data and chunk files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    Lz4,
    Snappy,
    Gzip,
    None,
}

impl Compression {
    pub fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::Zstd => ParquetCompression::Zstd(None),
            Compression::Lz4 => ParquetCompression::Lz4Raw,
            Compression::Snappy => ParquetCompression::Snappy,
            Compression::Gzip => ParquetCompression::Gzip(None),
            Compression::None => ParquetCompression::Uncompressed,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_lock_timeout_secs() -> f64 {
    10.0
}

/// Configuration for a storage instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    #[serde(default)]
    pub strategy: StorageStrategy,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub partition_granularity: Granularity,
    /// Explicit partition levels. Derived from granularity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_cols: Option<Vec<PartitionLevel>>,
    #[serde(default = "default_true")]
    pub atomic_writes: bool,
    #[serde(default = "default_true")]
    pub enable_locking: bool,
    /// Seconds to wait for a metadata lock before giving up.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: f64,
    #[serde(default = "default_true")]
    pub metadata_tracking: bool,
    #[serde(default = "default_true")]
    pub generate_profile: bool,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            strategy: StorageStrategy::default(),
            compression: Compression::default(),
            partition_granularity: Granularity::default(),
            partition_cols: None,
            atomic_writes: true,
            enable_locking: true,
            lock_timeout_secs: default_lock_timeout_secs(),
            metadata_tracking: true,
            generate_profile: true,
        }
    }

    pub fn with_strategy(mut self, strategy: StorageStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.partition_granularity = granularity;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_partition_cols(mut self, cols: Vec<PartitionLevel>) -> Self {
        self.partition_cols = Some(cols);
        self
    }

    pub fn with_atomic_writes(mut self, enabled: bool) -> Self {
        self.atomic_writes = enabled;
        self
    }

    pub fn with_locking(mut self, enabled: bool) -> Self {
        self.enable_locking = enabled;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_metadata_tracking(mut self, enabled: bool) -> Self {
        self.metadata_tracking = enabled;
        self
    }

    pub fn with_profile(mut self, enabled: bool) -> Self {
        self.generate_profile = enabled;
        self
    }

    /// Lock wait as a `Duration`. Values `validate` would reject fall back to the default.
    pub fn lock_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.lock_timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_lock_timeout_secs()))
    }

    /// Partition levels in effect: explicit list if set, else derived.
    pub fn partition_levels(&self) -> Vec<PartitionLevel> {
        match &self.partition_cols {
            Some(cols) => cols.clone(),
            None => self.derived_levels(),
        }
    }

    fn derived_levels(&self) -> Vec<PartitionLevel> {
        match self.strategy {
            StorageStrategy::Hive => self.partition_granularity.levels(),
            StorageStrategy::Flat => Vec::new(),
        }
    }

    /// Fill in `partition_cols` from the granularity if it was not given.
    ///
    /// Idempotent: an already populated list is left alone.
    pub fn normalized(mut self) -> Self {
        if self.partition_cols.is_none() {
            self.partition_cols = Some(self.derived_levels());
        }
        self
    }

    /// Reject partition lists the pruner cannot reason about.
    pub fn validate(&self) -> StorageResult<()> {
        let levels = self.partition_levels();
        if self.strategy == StorageStrategy::Flat && !levels.is_empty() {
            return Err(StorageError::InvalidConfig(
                "flat strategy does not take partition columns".into(),
            ));
        }
        if levels.len() > 4 || levels[..] != PartitionLevel::ALL[..levels.len()] {
            return Err(StorageError::InvalidConfig(format!(
                "partition columns {levels:?} must be a prefix of [year, month, day, hour]"
            )));
        }
        let timeout = Duration::try_from_secs_f64(self.lock_timeout_secs).ok();
        if timeout.and_then(|t| Instant::now().checked_add(t)).is_none() {
            return Err(StorageError::InvalidConfig(format!(
                "lock_timeout_secs must be a non-negative number of seconds in range, got {}",
                self.lock_timeout_secs
            )));
        }
        Ok(())
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> StorageResult<Self> {
        toml::from_str(content).map_err(|e| StorageError::Config(format!("parse TOML: {e}")))
    }

    pub fn to_toml(&self) -> StorageResult<String> {
        toml::to_string_pretty(self).map_err(|e| StorageError::Config(format!("serialize: {e}")))
    }
}
