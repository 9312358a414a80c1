//! Atomic file writes: temp file in the target's directory, fsync, rename.
//!
//! A reader of the target path sees either the previous file or the complete
//! new one. If the write fails before the rename, the temp file is removed and
//! the target is left as it was.

use super::config::Compression;
use super::error::StorageResult;
use polars::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Run `body` against a fresh temp file next to `target`, then rename it over
/// `target`.
pub fn write_atomic<F>(target: &Path, body: F) -> StorageResult<()>
where
    F: FnOnce(&mut File) -> StorageResult<()>,
{
    let dir = parent_dir(target);
    let stem = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(".tmp")
        .tempfile_in(&dir)?;

    // On error the NamedTempFile drop removes the partial file.
    body(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;

    tmp.persist(target).map_err(|e| e.error)?;
    tracing::trace!(path = %target.display(), "atomic rename complete");
    Ok(())
}

/// Write a frame as parquet, atomically unless `atomic` is false.
pub fn write_parquet(
    df: &mut DataFrame,
    target: &Path,
    compression: Compression,
    atomic: bool,
) -> StorageResult<()> {
    let codec = compression.to_parquet();
    if atomic {
        write_atomic(target, |file| {
            ParquetWriter::new(file).with_compression(codec).finish(df)?;
            Ok(())
        })
    } else {
        let file = File::create(target)?;
        ParquetWriter::new(file).with_compression(codec).finish(df)?;
        Ok(())
    }
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(value: &T, target: &Path) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(target, |file| {
        file.write_all(&bytes)?;
        Ok(())
    })
}
