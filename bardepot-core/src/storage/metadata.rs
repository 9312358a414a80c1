//! Per-key JSON manifests under `<base>/.metadata/`.
//!
//! Every mutation is a read-modify-write of the whole document, written with
//! [`write_json_atomic`] and, when locking is enabled, done while holding the
//! key's `.lock` file. Unknown top-level fields survive the round trip.

use super::error::{StorageError, StorageResult};
use super::key::encode_key;
use super::lock::KeyLock;
use super::writer::write_json_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Most recent update-history entries kept per key.
pub const HISTORY_LIMIT: usize = 100;

/// Directory name of the metadata area inside the base path.
pub const METADATA_DIR: &str = ".metadata";

/// One incremental update applied to a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub timestamp: DateTime<Utc>,
    pub records_added: i64,
    pub chunk_file: String,
}

/// Typed view of a key's manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Time of the most recent `write`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Partitions materialized by the most recent `write`, relative to the key directory.
    #[serde(default)]
    pub partitions: Vec<String>,
    /// Rows in the most recent `write` (not a running total).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default)]
    pub schema: Vec<String>,
    #[serde(default)]
    pub custom: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_history: Vec<UpdateRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KeyMetadata {
    pub fn latest_update(&self) -> Option<&UpdateRecord> {
        self.update_history.last()
    }
}

/// Append `record` to the document's `update_history`, keeping the newest
/// [`HISTORY_LIMIT`] entries.
pub fn push_history(doc: &mut Map<String, Value>, record: &UpdateRecord) -> StorageResult<()> {
    let entry = serde_json::to_value(record)?;
    let history = doc
        .entry("update_history")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !history.is_array() {
        *history = Value::Array(Vec::new());
    }
    if let Value::Array(items) = history {
        items.push(entry);
        if items.len() > HISTORY_LIMIT {
            let excess = items.len() - HISTORY_LIMIT;
            items.drain(..excess);
        }
    }
    Ok(())
}

/// Reads and writes key manifests.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
    locking: bool,
    lock_timeout: Duration,
}

impl MetadataStore {
    /// Open (creating if needed) the metadata directory.
    pub fn open(
        dir: impl Into<PathBuf>,
        locking: bool,
        lock_timeout: Duration,
    ) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locking,
            lock_timeout,
        })
    }

    pub fn metadata_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.dir.join(format!("{}.json", encode_key(key)?)))
    }

    pub fn lock_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.dir.join(format!("{}.lock", encode_key(key)?)))
    }

    fn read_document(path: &Path) -> StorageResult<Option<Map<String, Value>>> {
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

    /// Read-modify-write the key's document under its lock.
    pub fn modify<T, F>(&self, key: &str, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Map<String, Value>) -> StorageResult<T>,
    {
        let path = self.metadata_path(key)?;
        let _guard = if self.locking {
            Some(KeyLock::acquire(&self.lock_path(key)?, self.lock_timeout)?)
        } else {
            None
        };

        let mut doc = Self::read_document(&path)?.unwrap_or_default();
        let out = f(&mut doc)?;
        write_json_atomic(&doc, &path)?;
        tracing::debug!(key, path = %path.display(), "metadata updated");
        Ok(out)
    }

    /// Merge `fields` over the existing top-level fields (or create the document).
    pub fn update(&self, key: &str, fields: Map<String, Value>) -> StorageResult<()> {
        self.modify(key, |doc| {
            doc.extend(fields);
            Ok(())
        })
    }

    /// Typed manifest, `None` when the key has none. Malformed JSON is an error.
    pub fn get(&self, key: &str) -> StorageResult<Option<KeyMetadata>> {
        let path = self.metadata_path(key)?;
        match Self::read_document(&path)? {
            None => Ok(None),
            Some(doc) => serde_json::from_value(Value::Object(doc))
                .map(Some)
                .map_err(|source| StorageError::MetadataDecode { path, source }),
        }
    }

    /// Raw JSON document, for callers that stash their own fields.
    pub fn get_raw(&self, key: &str) -> StorageResult<Option<Map<String, Value>>> {
        Self::read_document(&self.metadata_path(key)?)
    }

    /// Remove the key's manifest and its lock file. Returns whether a manifest existed.
    pub fn remove(&self, key: &str) -> StorageResult<bool> {
        let path = self.metadata_path(key)?;
        let lock_path = self.lock_path(key)?;
        let guard = if self.locking {
            Some(KeyLock::acquire(&lock_path, self.lock_timeout)?)
        } else {
            None
        };

        let existed = remove_if_present(&path)?;
        remove_if_present(&lock_path)?;
        drop(guard);
        Ok(existed)
    }
}

fn remove_if_present(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
