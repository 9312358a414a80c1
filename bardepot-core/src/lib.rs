//! Bardepot Core: on-disk store for OHLCV market data.
//!
//! Datasets are kept as parquet files in Hive-style `year=/month=/day=/hour=`
//! directories under one base path:
//! - Partition derivation from the `timestamp` column, always in UTC
//! - Atomic temp-file-and-rename writes
//! - Date-range reads that prune partitions by directory name
//! - Per-key JSON manifests guarded by file locks
//! - Incremental chunk/merge helpers keyed by provider and symbol
//! - Optional column profiles written next to the data

pub mod domain;
pub mod profile;
pub mod storage;

pub use domain::{DataMetadata, DataObject};
pub use profile::{ColumnProfile, DatasetProfile};
pub use storage::{
    IncrementalStorage, Storage, StorageBackend, StorageConfig, StorageError, StorageResult,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: storage handles can be shared across threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Storage>();
        require_sync::<Storage>();
        require_send::<StorageConfig>();
        require_sync::<StorageConfig>();
        require_send::<storage::MetadataStore>();
        require_sync::<storage::MetadataStore>();
        require_send::<storage::KeyMetadata>();
        require_sync::<storage::KeyMetadata>();
        require_send::<DataObject>();
        require_sync::<DataObject>();
        require_send::<DatasetProfile>();
        require_sync::<DatasetProfile>();
        require_send::<StorageError>();
        require_sync::<StorageError>();
    }

    /// Both storage traits stay object safe.
    #[test]
    fn traits_are_object_safe() {
        fn _backend(_: &dyn StorageBackend) {}
        fn _incremental(_: &dyn IncrementalStorage) {}
    }
}
