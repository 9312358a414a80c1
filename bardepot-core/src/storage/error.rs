//! Structured error types for the storage engine.
//!
//! Variants are distinguishable so callers can branch on "missing key" vs
//! "lock timeout" vs "schema problem" without string matching.

use polars::prelude::{DataType, PolarsError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("missing required column: {column}")]
    MissingColumn { column: String },

    #[error("column '{column}' must be a date or datetime, got {dtype:?}")]
    InvalidTimestampType { column: String, dtype: DataType },

    #[error("timestamp column has {count} null value(s)")]
    NullTimestamps { count: usize },

    #[error("a storage key is required unless writing a DataObject")]
    MissingKey,

    #[error("invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("key '{key}' not found in storage")]
    KeyNotFound { key: String },

    #[error("timed out after {timeout:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("malformed metadata file {}: {source}", path.display())]
    MetadataDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config parse error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// True for the soft "nothing stored under this key" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::KeyNotFound { .. })
    }
}
