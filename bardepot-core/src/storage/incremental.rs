//! Incremental updates keyed by `(provider, symbol)`.
//!
//! Raw fetch results are kept as chunk files under
//! `<base>/.chunks/<provider>/<symbol>/` and merged into the combined
//! dataset stored at key `<provider>/<symbol>`.

use super::backend::{Storage, StorageBackend, WriteInput};
use super::error::{StorageError, StorageResult};
use super::metadata::{push_history, UpdateRecord};
use super::partition::{validate_timestamp, TIMESTAMP_COL};
use super::writer::write_parquet;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

/// Directory name of the chunk area inside the base path.
pub const CHUNKS_DIR: &str = ".chunks";

const CHUNK_TIME_FORMAT: &str = "%Y%m%d_%H%M";

/// Storage key of the combined dataset for `provider`/`symbol`.
pub fn incremental_key(provider: &str, symbol: &str) -> String {
    format!("{provider}/{symbol}")
}

/// Operations used by incremental data pipelines.
pub trait IncrementalStorage {
    /// Largest stored timestamp, or `None` if nothing is stored yet.
    fn get_latest_timestamp(
        &self,
        symbol: &str,
        provider: &str,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    /// Persist a raw fetch result as its own chunk file.
    fn save_chunk(
        &self,
        data: &DataFrame,
        symbol: &str,
        provider: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> StorageResult<PathBuf>;

    /// Merge `data` into the combined dataset, newest values winning on
    /// timestamp collisions. Returns the change in row count.
    fn update_combined_file(
        &self,
        data: &DataFrame,
        symbol: &str,
        provider: &str,
    ) -> StorageResult<i64>;

    /// Eagerly read the combined dataset; empty if nothing is stored.
    fn read_data(
        &self,
        symbol: &str,
        provider: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> StorageResult<DataFrame>;

    /// Record one applied update in the key's manifest.
    fn update_metadata(
        &self,
        symbol: &str,
        provider: &str,
        last_update: DateTime<Utc>,
        records_added: i64,
        chunk_file: &str,
    ) -> StorageResult<()>;
}

/// Provider and symbol become single path components under `.chunks/`.
fn chunk_component<'a>(kind: &str, value: &'a str) -> StorageResult<&'a str> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidKey {
            key: value.to_string(),
            reason: format!("{kind} must be a single non-empty path component"),
        });
    }
    Ok(value)
}

impl Storage {
    fn chunk_dir(&self, symbol: &str, provider: &str) -> StorageResult<PathBuf> {
        Ok(self
            .base_path()
            .join(CHUNKS_DIR)
            .join(chunk_component("provider", provider)?)
            .join(chunk_component("symbol", symbol)?))
    }

    /// Chunk files saved for `provider`/`symbol`, oldest name first.
    pub fn chunk_files(&self, symbol: &str, provider: &str) -> StorageResult<Vec<PathBuf>> {
        let dir = self.chunk_dir(symbol, provider)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_chunk = path.extension().is_some_and(|e| e == "parquet")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if is_chunk {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Directory of the combined dataset for `provider`/`symbol`.
    pub fn combined_file_path(&self, symbol: &str, provider: &str) -> StorageResult<PathBuf> {
        self.key_path(&incremental_key(provider, symbol))
    }
}

impl IncrementalStorage for Storage {
    fn get_latest_timestamp(
        &self,
        symbol: &str,
        provider: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let key = incremental_key(provider, symbol);
        if !self.exists(&key) {
            return Ok(None);
        }
        let columns = [TIMESTAMP_COL.to_string()];
        let stamps = self.read(&key, None, None, Some(&columns))?.collect()?;
        if stamps.height() == 0 {
            return Ok(None);
        }
        let latest = stamps
            .lazy()
            .select([col(TIMESTAMP_COL)
                .dt()
                .timestamp(TimeUnit::Microseconds)
                .max()
                .alias("latest_us")])
            .collect()?;
        let micros = latest.column("latest_us")?.i64()?.get(0);
        Ok(micros.and_then(DateTime::from_timestamp_micros))
    }

    fn save_chunk(
        &self,
        data: &DataFrame,
        symbol: &str,
        provider: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> StorageResult<PathBuf> {
        let dir = self.chunk_dir(symbol, provider)?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "{}_{}.parquet",
            start_time.format(CHUNK_TIME_FORMAT),
            end_time.format(CHUNK_TIME_FORMAT)
        ));
        let mut frame = data.clone();
        write_parquet(
            &mut frame,
            &path,
            self.config().compression,
            self.config().atomic_writes,
        )?;
        tracing::debug!(
            provider,
            symbol,
            rows = data.height(),
            path = %path.display(),
            "saved chunk"
        );
        Ok(path)
    }

    fn update_combined_file(
        &self,
        data: &DataFrame,
        symbol: &str,
        provider: &str,
    ) -> StorageResult<i64> {
        validate_timestamp(data)?;
        let key = incremental_key(provider, symbol);

        let existing = if self.exists(&key) {
            self.read(&key, None, None, None)?.collect()?
        } else {
            DataFrame::empty()
        };
        let rows_before = existing.height();

        let combined = if rows_before == 0 {
            data.clone().lazy()
        } else {
            concat(
                [existing.lazy(), data.clone().lazy()],
                UnionArgs {
                    to_supertypes: true,
                    ..Default::default()
                },
            )?
        };

        let merged = combined
            .unique_stable(
                Some(vec![TIMESTAMP_COL.into()]),
                UniqueKeepStrategy::Last,
            )
            .sort(
                [TIMESTAMP_COL],
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .collect()?;
        let rows_after = merged.height();

        self.write(WriteInput::Frame(merged), Some(&key), None)?;

        let added = rows_after as i64 - rows_before as i64;
        tracing::info!(provider, symbol, rows_before, rows_after, added, "combined file updated");
        Ok(added)
    }

    fn read_data(
        &self,
        symbol: &str,
        provider: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> StorageResult<DataFrame> {
        let key = incremental_key(provider, symbol);
        if !self.exists(&key) {
            return Ok(DataFrame::empty());
        }
        Ok(self.read(&key, start_time, end_time, None)?.collect()?)
    }

    fn update_metadata(
        &self,
        symbol: &str,
        provider: &str,
        last_update: DateTime<Utc>,
        records_added: i64,
        chunk_file: &str,
    ) -> StorageResult<()> {
        let key = incremental_key(provider, symbol);
        let record = UpdateRecord {
            timestamp: last_update,
            records_added,
            chunk_file: chunk_file.to_string(),
        };
        self.metadata_store().modify(&key, |doc| {
            doc.entry("symbol").or_insert_with(|| json!(symbol));
            doc.entry("provider").or_insert_with(|| json!(provider));
            doc.entry("first_update").or_insert_with(|| json!(last_update));
            doc.insert("last_update".into(), json!(last_update));
            push_history(doc, &record)
        })
    }
}
