//! The storage facade: write, read, list, delete, metadata.

use super::config::{PartitionLevel, StorageConfig};
use super::error::{StorageError, StorageResult};
use super::key::{decode_key, encode_key};
use super::metadata::{KeyMetadata, MetadataStore, METADATA_DIR};
use super::partition::{derive_partition_columns, split_partitions, DATA_FILE, TIMESTAMP_COL};
use super::reader::{PartitionFile, PartitionReader};
use super::writer::write_parquet;
use crate::domain::DataObject;
use crate::profile::{generate_profile, profile_path, save_profile};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Anything `write` accepts.
#[derive(Clone)]
pub enum WriteInput {
    Frame(DataFrame),
    Lazy(LazyFrame),
    Object(DataObject),
}

// `LazyFrame` has no `Debug`, so only the variant and the eager shape are shown.
impl std::fmt::Debug for WriteInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteInput::Frame(df) => f.debug_tuple("Frame").field(&df.shape()).finish(),
            WriteInput::Lazy(_) => f.write_str("Lazy(..)"),
            WriteInput::Object(obj) => f.debug_tuple("Object").field(&obj.metadata).finish(),
        }
    }
}

impl From<DataFrame> for WriteInput {
    fn from(df: DataFrame) -> Self {
        WriteInput::Frame(df)
    }
}

impl From<LazyFrame> for WriteInput {
    fn from(lf: LazyFrame) -> Self {
        WriteInput::Lazy(lf)
    }
}

impl From<DataObject> for WriteInput {
    fn from(obj: DataObject) -> Self {
        WriteInput::Object(obj)
    }
}

/// What a successful `write` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub key: String,
    /// The key's directory.
    pub path: PathBuf,
    /// Partition directories written, relative to the key directory.
    pub partitions: Vec<String>,
    pub row_count: usize,
}

/// Core storage operations.
pub trait StorageBackend {
    /// Persist `data` under `key` (or the key a `DataObject` implies).
    fn write(
        &self,
        data: WriteInput,
        key: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> StorageResult<WriteReceipt>;

    /// Lazy view of a key's rows with `start <= timestamp < end`.
    fn read(
        &self,
        key: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        columns: Option<&[String]>,
    ) -> StorageResult<LazyFrame>;

    fn list_keys(&self) -> StorageResult<Vec<String>>;

    fn exists(&self, key: &str) -> bool;

    /// Remove a key's data and manifest. `false` if there was nothing to remove.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    fn get_metadata(&self, key: &str) -> StorageResult<Option<KeyMetadata>>;
}

/// Storage engine over one base directory.
///
/// Hive and flat layouts share everything except the partition levels, which
/// come from the config's strategy and granularity.
#[derive(Debug, Clone)]
pub struct Storage {
    config: StorageConfig,
    levels: Vec<PartitionLevel>,
    metadata: MetadataStore,
}

impl Storage {
    /// Open a storage instance, creating the base and metadata directories.
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let config = config.normalized();
        config.validate()?;
        fs::create_dir_all(&config.base_path)?;
        let metadata = MetadataStore::open(
            config.base_path.join(METADATA_DIR),
            config.enable_locking,
            config.lock_timeout(),
        )?;
        let levels = config.partition_levels();
        tracing::debug!(
            base_path = %config.base_path.display(),
            strategy = ?config.strategy,
            ?levels,
            "storage opened"
        );
        Ok(Self {
            config,
            levels,
            metadata,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    pub fn partition_levels(&self) -> &[PartitionLevel] {
        &self.levels
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Directory holding a key's partitions.
    pub fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.config.base_path.join(encode_key(key)?))
    }

    /// Leaf data files currently stored for `key`.
    pub fn partition_files(&self, key: &str) -> StorageResult<Vec<PartitionFile>> {
        let key_dir = self.existing_key_path(key)?;
        PartitionReader::new(&key_dir, &self.levels).files()
    }

    fn existing_key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let key_dir = self.key_path(key)?;
        if !key_dir.is_dir() {
            return Err(StorageError::KeyNotFound {
                key: key.to_string(),
            });
        }
        Ok(key_dir)
    }

    fn write_frame(
        &self,
        df: DataFrame,
        key: &str,
        custom: Option<Map<String, Value>>,
    ) -> StorageResult<WriteReceipt> {
        let key_dir = self.key_path(key)?;
        let derived = derive_partition_columns(&df, &self.levels)?;
        let parts = split_partitions(&derived, &self.levels)?;
        drop(derived);

        fs::create_dir_all(&key_dir)?;
        let mut partitions = Vec::with_capacity(parts.len());
        for (values, mut frame) in parts {
            let dir = key_dir.join(values.dir_path());
            fs::create_dir_all(&dir)?;
            write_parquet(
                &mut frame,
                &dir.join(DATA_FILE),
                self.config.compression,
                self.config.atomic_writes,
            )?;
            partitions.push(if values.is_root() {
                ".".to_string()
            } else {
                values.relative_name()
            });
        }

        let schema: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        if self.config.metadata_tracking {
            let mut fields = Map::new();
            fields.insert("last_updated".into(), json!(Utc::now()));
            fields.insert("partitions".into(), json!(partitions));
            fields.insert("row_count".into(), json!(df.height()));
            fields.insert("schema".into(), json!(schema));
            if let Some(custom) = custom {
                fields.insert("custom".into(), Value::Object(custom));
            }
            self.metadata.update(key, fields)?;
        }

        if self.config.generate_profile {
            let result = generate_profile(&df, key, TIMESTAMP_COL, Some("symbol"))
                .and_then(|profile| save_profile(&profile, &profile_path(&key_dir)));
            if let Err(e) = result {
                tracing::warn!(key, error = %e, "profile generation failed");
            }
        }

        tracing::info!(
            key,
            rows = df.height(),
            partitions = partitions.len(),
            "wrote dataset"
        );

        Ok(WriteReceipt {
            key: key.to_string(),
            path: key_dir,
            partitions,
            row_count: df.height(),
        })
    }
}

impl StorageBackend for Storage {
    fn write(
        &self,
        data: WriteInput,
        key: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> StorageResult<WriteReceipt> {
        match data {
            WriteInput::Object(obj) => {
                let key = match key {
                    Some(k) => k.to_string(),
                    None => obj.storage_key(),
                };
                let mut custom = metadata.unwrap_or_default();
                if let Value::Object(fields) = serde_json::to_value(&obj.metadata)? {
                    for (k, v) in fields {
                        custom.entry(k).or_insert(v);
                    }
                }
                self.write_frame(obj.data, &key, Some(custom))
            }
            WriteInput::Frame(df) => {
                let key = key.ok_or(StorageError::MissingKey)?;
                self.write_frame(df, key, metadata)
            }
            WriteInput::Lazy(lf) => {
                let key = key.ok_or(StorageError::MissingKey)?;
                self.write_frame(lf.collect()?, key, metadata)
            }
        }
    }

    fn read(
        &self,
        key: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        columns: Option<&[String]>,
    ) -> StorageResult<LazyFrame> {
        let key_dir = self.existing_key_path(key)?;
        PartitionReader::new(&key_dir, &self.levels).scan(start, end, columns)
    }

    fn list_keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(self.base_path())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(key) = entry.file_name().to_str().and_then(decode_key) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> bool {
        self.key_path(key).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let key_dir = self.key_path(key)?;
        let had_data = key_dir.is_dir();
        if had_data {
            fs::remove_dir_all(&key_dir)?;
        }
        let had_metadata = self.metadata.remove(key)?;
        if !(had_data || had_metadata) {
            return Ok(false);
        }
        tracing::info!(key, had_data, had_metadata, "deleted dataset");
        Ok(true)
    }

    fn get_metadata(&self, key: &str) -> StorageResult<Option<KeyMetadata>> {
        self.metadata.get(key)
    }
}
